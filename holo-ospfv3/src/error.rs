//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::Ipv6Network;
use tracing::{warn, warn_span};

use crate::collections::{AreaId, InterfaceId, LsaEntryId, NeighborId};
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::lsa::LsaType;

// OSPFv3 errors.
#[derive(Debug)]
pub enum Error {
    // Inter-task communication
    AreaIdNotFound(AreaId),
    InterfaceIdNotFound(InterfaceId),
    NeighborIdNotFound(NeighborId),
    LsaEntryIdNotFound(LsaEntryId),
    // Instance input
    InterfaceNotFound(String),
    AreaNotFound(Ipv4Addr),
    InvalidConfig(ConfigError),
    DuplicateInterface(String),
    // Packet input
    InvalidSrcAddr(Ipv6Addr),
    InvalidDstAddr(Ipv6Addr),
    UnknownNeighbor(Ipv6Addr, Ipv4Addr),
    InterfaceCfgError(String, Ipv6Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    LsaReservedScope(LsaType),
    // SPF
    SpfRootNotFound(Ipv4Addr),
    // Other
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
}

// Interface configuration mismatches detected on received packets.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u16, u16),
    ExternalRoutingCapabilityMismatch(bool),
    MtuMismatch(u16),
    DuplicateRouterId(Ipv4Addr),
}

// Configuration validation errors.
#[derive(Debug, Eq, PartialEq)]
pub enum ConfigError {
    MissingRouterId,
    DuplicateArea(Ipv4Addr),
    UnknownArea(String, Ipv4Addr),
    InvalidHelloInterval(String, u16),
    InvalidDeadInterval(String, u16),
    InvalidRetransmitInterval(String, u16),
    InvalidCost(String, u32),
    InvalidDefaultCost(Ipv4Addr, u32),
    InvalidRangeCost(Ipv4Addr, Ipv6Network, u32),
    InconsistentRange(Ipv4Addr, Ipv6Network, Ipv6Network),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AreaIdNotFound(area_id) => {
                warn!(?area_id, "{}", self);
            }
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self);
            }
            Error::NeighborIdNotFound(nbr_id) => {
                warn!(?nbr_id, "{}", self);
            }
            Error::LsaEntryIdNotFound(lse_id) => {
                warn!(?lse_id, "{}", self);
            }
            Error::InterfaceNotFound(name)
            | Error::DuplicateInterface(name) => {
                warn!(%name, "{}", self);
            }
            Error::AreaNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::InvalidConfig(error) => {
                error.log();
            }
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::InterfaceCfgError(iface, source, pkt_type, error) => {
                warn_span!("interface", name = %iface, %source).in_scope(|| {
                    warn!(?pkt_type, "{}", error);
                })
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, "{}", self);
                })
            }
            Error::LsaReservedScope(lsa_type) => {
                warn!(%lsa_type, "{}", self);
            }
            Error::SpfRootNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::IsmUnexpectedEvent(state, event) => warn_span!("fsm")
                .in_scope(|| {
                    warn!(?state, ?event, "{}", self);
                }),
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn_span!("fsm").in_scope(|| {
                        warn!(?state, ?event, "{}", self);
                    })
                })
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AreaIdNotFound(..) => {
                write!(f, "area ID not found")
            }
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::NeighborIdNotFound(..) => {
                write!(f, "neighbor ID not found")
            }
            Error::LsaEntryIdNotFound(..) => {
                write!(f, "LSA entry ID not found")
            }
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not found")
            }
            Error::AreaNotFound(..) => {
                write!(f, "area not found")
            }
            Error::InvalidConfig(error) => error.fmt(f),
            Error::DuplicateInterface(..) => {
                write!(f, "interface already exists")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::InterfaceCfgError(_, _, _, error) => error.fmt(f),
            Error::DbDescReject(..) => {
                write!(f, "database description packet rejected")
            }
            Error::LsaReservedScope(..) => {
                write!(f, "discarding LSA due to reserved scope")
            }
            Error::SpfRootNotFound(..) => {
                write!(f, "SPF root not found")
            }
            Error::IsmUnexpectedEvent(..) | Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidConfig(error) => Some(error),
            Error::InterfaceCfgError(_, _, _, error) => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::InvalidConfig(error)
    }
}

// ===== impl InterfaceCfgError =====

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected) => {
                write!(
                    f,
                    "area ID mismatch (received {received}, expected {expected})"
                )
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                write!(
                    f,
                    "hello interval mismatch (received {received}, expected {expected})"
                )
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                write!(
                    f,
                    "dead interval mismatch (received {received}, expected {expected})"
                )
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit) => {
                write!(
                    f,
                    "external routing capability mismatch (E-bit {e_bit})"
                )
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                write!(f, "MTU mismatch (received {mtu})")
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                write!(f, "duplicate Router ID {router_id}")
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}

// ===== impl ConfigError =====

impl ConfigError {
    pub(crate) fn log(&self) {
        match self {
            ConfigError::MissingRouterId => {
                warn!("{}", self);
            }
            ConfigError::DuplicateArea(area_id) => {
                warn!(%area_id, "{}", self);
            }
            ConfigError::UnknownArea(name, area_id) => {
                warn!(interface = %name, %area_id, "{}", self);
            }
            ConfigError::InvalidHelloInterval(name, value)
            | ConfigError::InvalidDeadInterval(name, value)
            | ConfigError::InvalidRetransmitInterval(name, value) => {
                warn!(interface = %name, %value, "{}", self);
            }
            ConfigError::InvalidCost(name, value) => {
                warn!(interface = %name, %value, "{}", self);
            }
            ConfigError::InvalidDefaultCost(area_id, value) => {
                warn!(%area_id, %value, "{}", self);
            }
            ConfigError::InvalidRangeCost(area_id, prefix, value) => {
                warn!(%area_id, %prefix, %value, "{}", self);
            }
            ConfigError::InconsistentRange(area_id, range, nested) => {
                warn!(%area_id, %range, %nested, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingRouterId => {
                write!(f, "missing router-id")
            }
            ConfigError::DuplicateArea(..) => {
                write!(f, "duplicate area")
            }
            ConfigError::UnknownArea(..) => {
                write!(f, "interface references an unknown area")
            }
            ConfigError::InvalidHelloInterval(..) => {
                write!(f, "invalid hello interval")
            }
            ConfigError::InvalidDeadInterval(..) => {
                write!(f, "dead interval must be greater than hello interval")
            }
            ConfigError::InvalidRetransmitInterval(..) => {
                write!(f, "invalid retransmit interval")
            }
            ConfigError::InvalidCost(..) => {
                write!(f, "invalid interface cost")
            }
            ConfigError::InvalidDefaultCost(..) => {
                write!(f, "invalid stub default cost")
            }
            ConfigError::InvalidRangeCost(..) => {
                write!(f, "invalid area range cost")
            }
            ConfigError::InconsistentRange(..) => {
                write!(f, "inconsistent advertise settings for nested ranges")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
