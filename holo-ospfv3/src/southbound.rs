//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use holo_utils::task::TimerService;
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::collections::Arena;
use crate::debug::Debug;
use crate::interface::Interface;
use crate::packet::Packet;
use crate::route::{PathType, RouteNet, RouteNetFlags};
use crate::tasks::TimerKey;

// Sends OSPFv3 packets out of a given interface.
pub trait Transport {
    fn send_packet(
        &self,
        packet: &Packet,
        dst: Ipv6Addr,
        ifname: &str,
        hop_limit: u8,
    );
}

// Read-only view of the system interfaces.
pub trait AddressTable {
    fn ifindex(&self, ifname: &str) -> Option<u32>;

    fn is_operative(&self, ifname: &str) -> bool;

    fn mtu(&self, ifname: &str) -> Option<u16>;

    fn linklocal(&self, ifname: &str) -> Option<Ipv6Addr>;

    fn is_loopback(&self, _ifname: &str) -> bool {
        false
    }

    // Global and unique-local prefixes configured on the interface.
    fn addresses(&self, ifname: &str) -> BTreeSet<Ipv6Network>;
}

// Destination of computed routes.
pub trait RouteSink {
    fn install(&self, route: &RouteEntry);

    fn uninstall(&self, prefix: &Ipv6Network);
}

// Collaborators of an OSPFv3 instance.
pub struct Southbound {
    pub transport: Box<dyn Transport>,
    pub addresses: Box<dyn AddressTable>,
    pub routes: Box<dyn RouteSink>,
    pub timers: Box<dyn TimerService<TimerKey>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteEntry {
    pub prefix: Ipv6Network,
    pub area_id: Option<Ipv4Addr>,
    pub path_type: PathType,
    pub metric: u32,
    pub nexthops: BTreeSet<RouteNexthop>,
    pub flags: RouteEntryFlags,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct RouteNexthop {
    pub ifname: String,
    pub ifindex: u32,
    pub addr: Option<Ipv6Addr>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct RouteEntryFlags: u8 {
        const CONNECTED = 0x01;
    }
}

// ===== impl Southbound =====

impl std::fmt::Debug for Southbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Southbound").finish_non_exhaustive()
    }
}

// ===== global functions =====

pub(crate) fn route_install(
    sb: &Southbound,
    destination: &Ipv6Network,
    route: &RouteNet,
    interfaces: &Arena<Interface>,
) {
    Debug::RouteInstall(destination, route.metric()).log();

    // Fill-in nexthops.
    let nexthops = route
        .nexthops
        .values()
        .filter_map(|nexthop| {
            let iface = interfaces.get(nexthop.iface_idx)?;
            Some(RouteNexthop {
                ifname: iface.name.clone(),
                ifindex: iface.system.ifindex.unwrap_or_default(),
                addr: nexthop.addr,
            })
        })
        .collect::<BTreeSet<_>>();

    let mut flags = RouteEntryFlags::empty();
    if route.flags.contains(RouteNetFlags::CONNECTED) {
        flags.insert(RouteEntryFlags::CONNECTED);
    }

    let entry = RouteEntry {
        prefix: *destination,
        area_id: route.area_id,
        path_type: route.path_type,
        metric: route.metric(),
        nexthops,
        flags,
    };
    sb.routes.install(&entry);
}

pub(crate) fn route_uninstall(sb: &Southbound, destination: &Ipv6Network) {
    Debug::RouteUninstall(destination).log();

    sb.routes.uninstall(destination);
}
