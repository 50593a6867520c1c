//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;

// OSPFv3 debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceStart,
    InstanceStop,
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a ism::State, &'a ism::Event),
    IsmTransition(&'a ism::State, &'a ism::State),
    IsmDrElection(
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
    ),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a str, &'a Ipv6Addr, &'a Ipv6Addr, &'a Packet),
    PacketTx(&'a str, &'a Ipv6Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    LsaMaxAgeRemove(&'a LsaHdr),
    LsaSeqNoWrap(&'a LsaHdr),
    // SPF
    SpfStart,
    SpfFinish(u32, usize),
    SpfNetworkUnreachableAbr(&'a Ipv6Network, Ipv4Addr),
    // Routing table
    RouteInstall(&'a Ipv6Network, u32),
    RouteUninstall(&'a Ipv6Network),
}

// Reason why OSPFv3 is inactive on an interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    OperationalDown,
    MissingIfindex,
    MissingMtu,
    MissingLinkLocalAddress,
    LoopedBack,
    Resetting,
}

// Reason why a SeqNoMismatch event was generated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                // Parent span(s): ospfv3-instance
                debug!("{}", self);
            }
            Debug::InterfaceCreate(name) | Debug::InterfaceStart(name) => {
                // Parent span(s): ospfv3-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::InterfaceStop(name, reason) => {
                // Parent span(s): ospfv3-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%reason, "{}", self);
                })
            }
            Debug::IsmEvent(state, event) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?state, ?event, "{}", self);
                })
            }
            Debug::IsmTransition(old_state, new_state) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_dr, ?new_dr, ?old_bdr, ?new_bdr, "{}", self);
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NsmEvent(router_id, state, event) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    })
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                // Parent span(s): ospfv3-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                })
            }
            Debug::PacketRx(ifname, src, dst, packet) => {
                // Parent span(s): ospfv3-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data =
                            serde_json::to_string(&packet).unwrap_or_default();
                        debug!(
                            interface = %ifname, %src, %dst, %data, "{}", self
                        );
                    })
                })
            }
            Debug::PacketTx(ifname, addr, packet) => {
                // Parent span(s): ospfv3-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data =
                            serde_json::to_string(&packet).unwrap_or_default();
                        debug!(interface = %ifname, %addr, %data, "{}", self);
                    })
                })
            }
            Debug::PacketRxIgnore(router_id, state) => {
                // Parent span(s): ospfv3-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                })
            }
            Debug::QuestionableAck(router_id, lsa_hdr)
            | Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                // Parent span(s): ospfv3-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaDiscard(router_id, lsa_hdr, error) => {
                // Parent span(s): ospfv3-instance
                debug_span!("neighbor", %router_id, %error).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr)
            | Debug::LsaMaxAgeRemove(lsa_hdr)
            | Debug::LsaSeqNoWrap(lsa_hdr) => {
                // Parent span(s): ospfv3-instance
                debug!(?lsa_hdr, "{}", self);
            }
            Debug::LsaFlush(lsa_hdr, reason) => {
                // Parent span(s): ospfv3-instance
                debug!(?lsa_hdr, %reason, "{}", self);
            }
            Debug::SpfStart => {
                // Parent span(s): ospfv3-instance
                debug!("{}", self);
            }
            Debug::SpfFinish(run_count, routes) => {
                // Parent span(s): ospfv3-instance
                debug!(%run_count, %routes, "{}", self);
            }
            Debug::SpfNetworkUnreachableAbr(destination, abr) => {
                // Parent span(s): ospfv3-instance
                debug!(%destination, %abr, "{}", self);
            }
            Debug::RouteInstall(prefix, metric) => {
                // Parent span(s): ospfv3-instance
                debug!(%prefix, %metric, "{}", self);
            }
            Debug::RouteUninstall(prefix) => {
                // Parent span(s): ospfv3-instance
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::IsmEvent(..) | Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::IsmTransition(..) | Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::IsmDrElection(..) => {
                write!(f, "DR election")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::PacketRxIgnore(..) => {
                write!(
                    f,
                    "ignoring packet received from a non-adjacent neighbor"
                )
            }
            Debug::QuestionableAck(..) => {
                write!(f, "received questionable ack")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA due to the MinLSArrival check")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaOriginateMinInterval(..) => {
                write!(
                    f,
                    "postponing LSA origination due to the MinLSInterval check"
                )
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::LsaMaxAgeRemove(..) => {
                write!(f, "removing MaxAge LSA")
            }
            Debug::LsaSeqNoWrap(..) => {
                write!(f, "sequence number wrapped, reoriginating LSA")
            }
            Debug::SpfStart => {
                write!(f, "starting SPF run")
            }
            Debug::SpfFinish(..) => {
                write!(f, "SPF run finished")
            }
            Debug::SpfNetworkUnreachableAbr(..) => {
                write!(f, "no route found for originating ABR")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
        }
    }
}

// ===== impl InterfaceInactiveReason =====

impl std::fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceInactiveReason::InstanceDown => {
                write!(f, "OSPF instance down")
            }
            InterfaceInactiveReason::OperationalDown => {
                write!(f, "operational status down")
            }
            InterfaceInactiveReason::MissingIfindex => {
                write!(f, "missing ifindex")
            }
            InterfaceInactiveReason::MissingMtu => {
                write!(f, "missing MTU")
            }
            InterfaceInactiveReason::MissingLinkLocalAddress => {
                write!(f, "missing link local IPv6 address")
            }
            InterfaceInactiveReason::LoopedBack => {
                write!(f, "looped back")
            }
            InterfaceInactiveReason::Resetting => {
                write!(f, "resetting")
            }
        }
    }
}

// ===== impl SeqNoMismatchReason =====

impl std::fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeqNoMismatchReason::InconsistentFlags => {
                write!(f, "inconsistent flags")
            }
            SeqNoMismatchReason::InconsistentOptions => {
                write!(f, "inconsistent options")
            }
            SeqNoMismatchReason::InconsistentSeqNo => {
                write!(f, "inconsistent sequence number")
            }
            SeqNoMismatchReason::UnexpectedDbDesc => {
                write!(f, "unexpected database description packet")
            }
            SeqNoMismatchReason::InvalidLsaType => {
                write!(f, "invalid LSA type")
            }
        }
    }
}

// ===== impl LsaFlushReason =====

impl std::fmt::Display for LsaFlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaFlushReason::Expiry => {
                write!(f, "expiry")
            }
            LsaFlushReason::PrematureAging => {
                write!(f, "premature aging")
            }
        }
    }
}
