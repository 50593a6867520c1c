//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collections::{AreaId, InterfaceId, NeighborId};
use crate::southbound::Southbound;

//
// OSPFv3 timers and internal events:
//
//                                    +--------------+
//              receive_packet () --> |              | --> Transport
//                                    |              |
//                  AgeTick (1x) ---> |              | --> RouteSink
//                                    |              |
//    Hello/Wait/DelayedAck (Nx) ---> |   instance   |
//               NbmaPoll (Nx) -----> |              |
//                                    |              |
//    Inactivity/DbDescRxmt/          |              |
//    LsRequestRxmt/LsUpdateRxmt/     |              |
//    DbDescFree (Nx) --------------> |              |
//                                    +--------------+
//                                       | ^
//                     protocol_input tx | | protocol_input rx
//                                       V |
//                          (ISM/NSM events, LSA origination,
//                           LS Update batching, LSA flushing)
//

// Key of a timer armed through the instance's timer service.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum TimerKey {
    AgeTick,
    Iface {
        area_id: AreaId,
        iface_id: InterfaceId,
        timer: IfaceTimer,
    },
    NbmaPoll {
        area_id: AreaId,
        iface_id: InterfaceId,
        addr: Ipv6Addr,
    },
    Nbr {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
        timer: NbrTimer,
    },
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum IfaceTimer {
    Hello,
    Wait,
    DelayedAck,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum NbrTimer {
    Inactivity,
    DbDescRxmt,
    LsRequestRxmt,
    LsUpdateRxmt,
    DbDescFree,
}

// OSPFv3 internal message types.
pub mod messages {
    use crate::collections::{
        AreaId, InterfaceId, LsaEntryId, LsdbId, NeighborId,
    };
    use crate::debug::LsaFlushReason;
    use crate::interface::ism;
    use crate::lsdb::LsaOriginateEvent;
    use crate::neighbor::nsm;
    use crate::packet::lsa::LsaBody;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (queued while processing an input, drained before the
    // input returns).
    pub mod input {
        use std::net::Ipv4Addr;

        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg),
            SendLsUpdate(SendLsUpdateMsg),
            LsaOrigEvent(LsaOrigEventMsg),
            LsaOrigCheck(LsaOrigCheckMsg),
            LsaFlush(LsaFlushMsg),
        }

        #[derive(Debug)]
        pub struct IsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub event: ism::Event,
        }

        #[derive(Debug)]
        pub struct NsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: NeighborId,
            pub event: nsm::Event,
        }

        #[derive(Debug)]
        pub struct SendLsUpdateMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: Option<NeighborId>,
        }

        #[derive(Debug)]
        pub struct LsaOrigEventMsg {
            pub event: LsaOriginateEvent,
        }

        #[derive(Debug)]
        pub struct LsaOrigCheckMsg {
            pub lsdb_id: LsdbId,
            pub lsa_id: Ipv4Addr,
            pub lsa_body: LsaBody,
        }

        #[derive(Debug)]
        pub struct LsaFlushMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
            pub reason: LsaFlushReason,
        }
    }

    // Output messages (instance -> transport).
    pub mod output {
        use crate::output::SendDestination;
        use crate::packet::Packet;

        #[derive(Clone, Debug)]
        pub struct NetTxPacketMsg {
            pub packet: Packet,
            pub dst: SendDestination,
        }
    }
}

// ===== global functions =====

// LSDB aging runs off a single one-second tick.
pub(crate) fn age_tick_timer(sb: &Southbound) {
    sb.timers.schedule(TimerKey::AgeTick, Duration::from_secs(1));
}

pub(crate) fn iface_timer_start(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    timer: IfaceTimer,
    timeout: u16,
) {
    let key = TimerKey::Iface {
        area_id,
        iface_id,
        timer,
    };
    sb.timers.schedule(key, Duration::from_secs(timeout.into()));
}

pub(crate) fn iface_timer_stop(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    timer: IfaceTimer,
) {
    let key = TimerKey::Iface {
        area_id,
        iface_id,
        timer,
    };
    sb.timers.cancel(&key);
}

pub(crate) fn nbma_poll_timer_start(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    addr: Ipv6Addr,
    poll_interval: u16,
) {
    let key = TimerKey::NbmaPoll {
        area_id,
        iface_id,
        addr,
    };
    sb.timers.schedule(key, Duration::from_secs(poll_interval.into()));
}

pub(crate) fn nbma_poll_timer_stop(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    addr: Ipv6Addr,
) {
    let key = TimerKey::NbmaPoll {
        area_id,
        iface_id,
        addr,
    };
    sb.timers.cancel(&key);
}

pub(crate) fn nbr_timer_start(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    timer: NbrTimer,
    timeout: u16,
) {
    let key = TimerKey::Nbr {
        area_id,
        iface_id,
        nbr_id,
        timer,
    };
    sb.timers.schedule(key, Duration::from_secs(timeout.into()));
}

pub(crate) fn nbr_timer_stop(
    sb: &Southbound,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    timer: NbrTimer,
) {
    let key = TimerKey::Nbr {
        area_id,
        iface_id,
        nbr_id,
        timer,
    };
    sb.timers.cancel(&key);
}
