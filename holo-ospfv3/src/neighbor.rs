//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nsm::{Event, State};
#[cfg(not(feature = "deterministic"))]
use rand::RngCore;
use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use crate::area::Area;
use crate::collections::{Arena, NeighborId};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{LsaEntry, LsaOriginateEvent, lsa_type_is_valid};
use crate::output;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDesc, DbDescFlags, Options};
use crate::tasks;
use crate::tasks::NbrTimer;
use crate::tasks::messages::output::NetTxPacketMsg;

#[derive(Debug)]
pub struct Neighbor {
    pub id: NeighborId,
    pub router_id: Ipv4Addr,
    // Interface ID advertised in the neighbor's Hellos.
    pub iface_id: Option<u32>,
    // Link-local address of the neighbor.
    pub src: Ipv6Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
    pub state: State,

    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<NetTxPacketMsg>,

    pub event_count: u32,
    pub discontinuity_time: DateTime<Utc>,

    pub lists: NeighborLsaLists,
    timers: NeighborTimers,
}

#[derive(Debug)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs enqueued for transmission in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs that need to be received from this neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that were requested but not received yet.
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
}

// Retransmission timers that are currently armed.
#[derive(Debug, Default)]
struct NeighborTimers {
    rxmt_dbdesc: bool,
    rxmt_lsreq: bool,
    rxmt_lsupd: bool,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};

    use crate::debug::SeqNoMismatchReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        id: NeighborId,
        router_id: Ipv4Addr,
        src: Ipv6Addr,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        // Initialize the DD Sequence Number.
        let dd_seq_no = {
            #[cfg(not(feature = "deterministic"))]
            {
                // Random value.
                rand::rng().next_u32()
            }
            #[cfg(feature = "deterministic")]
            {
                // Fixed value for deterministic test results.
                router_id.into()
            }
        };

        Neighbor {
            id,
            router_id,
            iface_id: None,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            event_count: 0,
            discontinuity_time: Utc::now(),
            lists: Default::default(),
            timers: Default::default(),
        }
    }

    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (self.state, &event) {
            // NSM (state, event) -> (Action, new state)
            (State::Down, Event::Start) => {
                // Poll the NBMA neighbor at the HelloInterval.
                iface.send_hello(area, instance, smallvec![self.src]);
                self.inactivity_timer_reset(iface, area, instance);
                Some(State::Attempt)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Attempt | State::Down, Event::HelloRcvd) => {
                self.inactivity_timer_reset(iface, area, instance);
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Init
                | State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::HelloRcvd,
            ) => {
                self.inactivity_timer_reset(iface, area, instance);
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::TwoWayRcvd)
            | (State::TwoWay, Event::AdjOk) => {
                if iface.need_adjacency(self) {
                    self.exstart_enter(iface, area, instance, lsa_entries);
                    Some(State::ExStart)
                } else {
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::ExStart, Event::NegotiationDone) => {
                // List the contents of the entire LSDB in the summary list.
                for lse in iface
                    .state
                    .lsdb
                    .iter(lsa_entries)
                    .chain(area.state.lsdb.iter(lsa_entries))
                    .chain(instance.state.lsdb.iter(lsa_entries))
                    .map(|(_, lse)| lse)
                    // Filter out unneeded LSAs.
                    .filter(|lse| {
                        lsa_type_is_valid(
                            Some(area.config.area_type),
                            lse.data.hdr.lsa_type,
                        )
                    })
                {
                    let lsa_key = lse.data.hdr.key();
                    if lse.data.hdr.is_maxage() {
                        // MaxAge LSAs are sent directly in LS Updates.
                        self.lists.ls_rxmt.insert(lsa_key, lse.data.clone());
                        self.rxmt_lsupd_start_check(iface, area, instance);
                    } else {
                        self.lists.db_summary.insert(lsa_key, lse.data.clone());
                    }
                }

                self.dd_flags.remove(DbDescFlags::I);
                Some(State::Exchange)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Exchange, Event::ExchangeDone) => {
                if self.lists.ls_request_pending.is_empty()
                    && self.lists.ls_request.is_empty()
                {
                    Some(State::Full)
                } else {
                    // Wait for outstanding LS Requests to be responded.
                    Some(State::Loading)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::Loading, Event::LoadingDone) => {
                // No action required.
                Some(State::Full)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::AdjOk,
            ) => {
                if iface.need_adjacency(self) {
                    None
                } else {
                    self.reset_adjacency(iface, area, instance);
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Exchange | State::Loading | State::Full,
                Event::SeqNoMismatch(_) | Event::BadLsReq,
            ) => {
                self.reset_adjacency(iface, area, instance);
                self.exstart_enter(iface, area, instance, lsa_entries);
                Some(State::ExStart)
            }
            // NSM (state, event) -> (Action, new state)
            (_, Event::Kill | Event::LinkDown | Event::InactivityTimer) => {
                self.reset_adjacency(iface, area, instance);
                self.inactivity_timer_stop(iface, area, instance);
                Some(State::Down)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::OneWayRcvd,
            ) => {
                self.reset_adjacency(iface, area, instance);
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::TwoWayRcvd,
            ) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::OneWayRcvd) => {
                // No action required.
                None
            }
            // Catch-all wildcard.
            _ => {
                Error::NsmUnexpectedEvent(self.router_id, self.state, event)
                    .log();
                return;
            }
        };

        // Check for FSM state change.
        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.fsm_state_change(iface, area, instance, event, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        event: Event,
        new_state: State,
    ) {
        // Trigger the NeighborChange event on broadcast/NBMA networks when
        // bidirectional communication is established or lost.
        if (new_state >= State::TwoWay) != (self.state >= State::TwoWay)
            && iface.is_broadcast_or_nbma()
        {
            instance
                .tx
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Check if the neighbor changed to/from the FULL state.
        if new_state == State::Full || self.state == State::Full {
            // (Re)originate LSAs that might have been affected.
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::NeighborToFromFull {
                    area_id: area.id,
                    iface_id: iface.id,
                });
        }

        // If a neighboring router has become inactive (Hello Packets have
        // not been seen for RouterDeadInterval seconds), it may still be
        // necessary to send Hello Packets to the dead neighbor. These Hello
        // Packets will be sent at the reduced rate PollInterval.
        if iface.config.if_type == InterfaceType::NonBroadcast {
            if new_state == State::Down && event == Event::InactivityTimer {
                if let Some(snbr) = iface
                    .config
                    .static_nbrs
                    .iter()
                    .find(|snbr| snbr.addr == self.src)
                {
                    tasks::nbma_poll_timer_start(
                        instance.sb,
                        area.id,
                        iface.id,
                        self.src,
                        snbr.poll_interval,
                    );
                }
            } else if self.state == State::Down {
                iface.nbma_poll_stop(area, instance, self.src);
            }
        }

        // Effectively transition to the new FSM state.
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;

        // Update statistics.
        self.event_count += 1;
        self.discontinuity_time = Utc::now();
    }

    // Initializes the DD negotiation and sends the first (empty) Database
    // Description packet.
    fn exstart_enter(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
        self.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
        output::send_dbdesc(self, iface, area, instance, lsa_entries);
    }

    pub(crate) fn loading_done_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        // Check if all pending LSA requests were received.
        if self.lists.ls_request_pending.is_empty() {
            // Stop the LS Request rxmt timer.
            self.rxmt_lsreq_stop(iface, area, instance);

            // Check if there are new LSAs to request.
            if !self.lists.ls_request.is_empty() {
                output::send_lsreq(self, iface, area, instance);
            } else if self.state == State::Loading {
                // Database loading has completed.
                instance.tx.nsm_event(
                    area.id,
                    iface.id,
                    self.id,
                    Event::LoadingDone,
                );
            }
        }
    }

    fn reset_adjacency(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        // Cancel all timers before clearing the LSA lists.
        tasks::nbr_timer_stop(
            instance.sb,
            area.id,
            iface.id,
            self.id,
            NbrTimer::DbDescFree,
        );
        self.rxmt_dbdesc_stop(iface, area, instance);
        self.rxmt_lsreq_stop(iface, area, instance);
        if self.timers.rxmt_lsupd {
            self.rxmt_timer_stop(iface, area, instance, NbrTimer::LsUpdateRxmt);
            self.timers.rxmt_lsupd = false;
        }

        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
    }

    pub(crate) fn dbdesc_is_dup(&self, dbdesc: &DbDesc) -> bool {
        if let Some(last_rcvd_dbdesc) = &self.last_rcvd_dbdesc
            && last_rcvd_dbdesc.options == dbdesc.options
            && last_rcvd_dbdesc.dd_flags == dbdesc.dd_flags
            && last_rcvd_dbdesc.dd_seq_no == dbdesc.dd_seq_no
        {
            return true;
        }

        false
    }

    fn inactivity_timer_reset(
        &self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        tasks::nbr_timer_start(
            instance.sb,
            area.id,
            iface.id,
            self.id,
            NbrTimer::Inactivity,
            iface.config.dead_interval,
        );
    }

    fn inactivity_timer_stop(
        &self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        tasks::nbr_timer_stop(
            instance.sb,
            area.id,
            iface.id,
            self.id,
            NbrTimer::Inactivity,
        );
    }

    // Keeps the last Database Description packet sent by the slave around
    // for RouterDeadInterval seconds, so it can answer master
    // retransmissions.
    pub(crate) fn dbdesc_free_timer_start(
        &self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        tasks::nbr_timer_start(
            instance.sb,
            area.id,
            iface.id,
            self.id,
            NbrTimer::DbDescFree,
            iface.config.dead_interval,
        );
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.rxmt_timer_start(iface, area, instance, NbrTimer::DbDescRxmt);
        self.timers.rxmt_dbdesc = true;
    }

    pub(crate) fn rxmt_dbdesc_stop(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if self.timers.rxmt_dbdesc {
            self.rxmt_timer_stop(iface, area, instance, NbrTimer::DbDescRxmt);
            self.timers.rxmt_dbdesc = false;
        }
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.rxmt_timer_start(iface, area, instance, NbrTimer::LsRequestRxmt);
        self.timers.rxmt_lsreq = true;
    }

    fn rxmt_lsreq_stop(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if self.timers.rxmt_lsreq {
            let timer = NbrTimer::LsRequestRxmt;
            self.rxmt_timer_stop(iface, area, instance, timer);
            self.timers.rxmt_lsreq = false;
        }
    }

    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_rxmt.is_empty() && !self.timers.rxmt_lsupd {
            let timer = NbrTimer::LsUpdateRxmt;
            self.rxmt_timer_start(iface, area, instance, timer);
            self.timers.rxmt_lsupd = true;
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if self.lists.ls_rxmt.is_empty() && self.timers.rxmt_lsupd {
            self.rxmt_timer_stop(iface, area, instance, NbrTimer::LsUpdateRxmt);
            self.timers.rxmt_lsupd = false;
        }
    }

    // Returns whether the given retransmission timer is armed.
    pub(crate) fn rxmt_active(&self, timer: NbrTimer) -> bool {
        match timer {
            NbrTimer::DbDescRxmt => self.timers.rxmt_dbdesc,
            NbrTimer::LsRequestRxmt => self.timers.rxmt_lsreq,
            NbrTimer::LsUpdateRxmt => self.timers.rxmt_lsupd,
            NbrTimer::Inactivity | NbrTimer::DbDescFree => false,
        }
    }

    // (Re)arms the given retransmission timer.
    pub(crate) fn rxmt_timer_start(
        &self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        timer: NbrTimer,
    ) {
        tasks::nbr_timer_start(
            instance.sb,
            area.id,
            iface.id,
            self.id,
            timer,
            iface.config.retransmit_interval,
        );
    }

    fn rxmt_timer_stop(
        &self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        timer: NbrTimer,
    ) {
        tasks::nbr_timer_stop(instance.sb, area.id, iface.id, self.id, timer);
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, ip6};

    use super::*;
    use crate::collections::NeighborIndex;
    use crate::configuration::{AreaCfg, InterfaceCfg};
    use crate::debug::SeqNoMismatchReason;
    use crate::instance::testing::TestInstance;
    use crate::packet::Packet;
    use crate::tasks::TimerKey;

    struct Setup {
        test: TestInstance,
        area: Area,
        iface: Interface,
        neighbors: Arena<Neighbor>,
        lsa_entries: Arena<LsaEntry>,
    }

    impl Setup {
        fn new(if_type: InterfaceType) -> Setup {
            let config = InterfaceCfg {
                if_type,
                ..Default::default()
            };
            let mut iface = Interface::new(1, "eth0".to_owned(), config);
            iface.system.operative = true;
            iface.system.ifindex = Some(2);
            iface.system.mtu = Some(1500);
            iface.system.linklocal_addr = Some(ip6!("fe80::1"));

            let mut setup = Setup {
                test: TestInstance::new(ip4!("1.1.1.1")),
                area: Area::new(1, AreaCfg::default()),
                iface,
                neighbors: Arena::default(),
                lsa_entries: Arena::default(),
            };
            let instance = setup.test.view();
            setup.iface.update(
                &setup.area,
                &instance,
                &mut setup.neighbors,
                &setup.lsa_entries,
            );
            setup.test.sent_to();
            setup
        }

        fn add_nbr(&mut self) -> NeighborIndex {
            let (nbr_idx, _) = self.iface.state.neighbors.insert(
                &mut self.neighbors,
                ip4!("2.2.2.2"),
                ip6!("fe80::2"),
            );
            nbr_idx
        }

        fn event(&mut self, nbr_idx: NeighborIndex, event: Event) {
            let instance = self.test.view();
            let nbr = &mut self.neighbors[nbr_idx];
            nbr.fsm(
                &mut self.iface,
                &self.area,
                &instance,
                &self.lsa_entries,
                event,
            );
        }

        fn state(&self, nbr_idx: NeighborIndex) -> State {
            self.neighbors[nbr_idx].state
        }
    }

    #[test]
    fn nsm_point_to_point_exstart() {
        let mut setup = Setup::new(InterfaceType::PointToPoint);
        let nbr_idx = setup.add_nbr();

        setup.event(nbr_idx, Event::HelloRcvd);
        assert_eq!(setup.state(nbr_idx), State::Init);
        assert!(setup.test.timers.is_scheduled(&TimerKey::Nbr {
            area_id: 1,
            iface_id: 1,
            nbr_id: setup.neighbors[nbr_idx].id,
            timer: NbrTimer::Inactivity,
        }));

        // Point-to-point neighbors always become adjacent.
        setup.event(nbr_idx, Event::TwoWayRcvd);
        assert_eq!(setup.state(nbr_idx), State::ExStart);
        let nbr = &setup.neighbors[nbr_idx];
        assert_eq!(
            nbr.dd_flags,
            DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS
        );
        assert!(nbr.rxmt_active(NbrTimer::DbDescRxmt));
        let packets = setup.test.sent_packets();
        assert!(matches!(
            packets.as_slice(),
            [Packet::DbDesc(dbdesc)] if dbdesc.lsa_hdrs.is_empty()
        ));

        // Negotiation done with an empty LSDB: nothing to exchange.
        setup.event(nbr_idx, Event::NegotiationDone);
        assert_eq!(setup.state(nbr_idx), State::Exchange);
        setup.event(nbr_idx, Event::ExchangeDone);
        assert_eq!(setup.state(nbr_idx), State::Full);

        // A sequence number mismatch restarts the negotiation.
        let seq_no = setup.neighbors[nbr_idx].dd_seq_no;
        setup.event(
            nbr_idx,
            Event::SeqNoMismatch(SeqNoMismatchReason::InconsistentSeqNo),
        );
        assert_eq!(setup.state(nbr_idx), State::ExStart);
        assert_eq!(setup.neighbors[nbr_idx].dd_seq_no, seq_no.wrapping_add(1));

        // Kill tears everything down.
        setup.event(nbr_idx, Event::Kill);
        assert_eq!(setup.state(nbr_idx), State::Down);
        let nbr = &setup.neighbors[nbr_idx];
        assert!(nbr.last_sent_dbdesc.is_none());
        assert!(!nbr.rxmt_active(NbrTimer::DbDescRxmt));
    }

    #[test]
    fn nsm_broadcast_two_way() {
        let mut setup = Setup::new(InterfaceType::Broadcast);
        let nbr_idx = setup.add_nbr();

        // Neither router is DR/BDR yet: no adjacency.
        setup.event(nbr_idx, Event::HelloRcvd);
        setup.event(nbr_idx, Event::TwoWayRcvd);
        assert_eq!(setup.state(nbr_idx), State::TwoWay);
        assert!(setup.test.sent_packets().is_empty());

        // The neighbor becomes DR.
        setup.iface.state.dr = Some(ip4!("2.2.2.2"));
        setup.event(nbr_idx, Event::AdjOk);
        assert_eq!(setup.state(nbr_idx), State::ExStart);

        // And goes away again.
        setup.iface.state.dr = None;
        setup.event(nbr_idx, Event::AdjOk);
        assert_eq!(setup.state(nbr_idx), State::TwoWay);

        setup.event(nbr_idx, Event::OneWayRcvd);
        assert_eq!(setup.state(nbr_idx), State::Init);
    }

    #[test]
    fn nsm_nbma_start() {
        let mut setup = Setup::new(InterfaceType::NonBroadcast);
        let nbr_idx = setup.add_nbr();

        setup.event(nbr_idx, Event::Start);
        assert_eq!(setup.state(nbr_idx), State::Attempt);
        assert_eq!(setup.test.sent_to(), vec![ip6!("fe80::2")]);

        setup.event(nbr_idx, Event::HelloRcvd);
        assert_eq!(setup.state(nbr_idx), State::Init);

        setup.event(nbr_idx, Event::InactivityTimer);
        assert_eq!(setup.state(nbr_idx), State::Down);
    }

    #[test]
    fn nsm_unexpected_event() {
        let mut setup = Setup::new(InterfaceType::PointToPoint);
        let nbr_idx = setup.add_nbr();

        setup.event(nbr_idx, Event::LoadingDone);
        assert_eq!(setup.state(nbr_idx), State::Down);
        assert_eq!(setup.neighbors[nbr_idx].event_count, 0);
    }
}
