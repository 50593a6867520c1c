//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, btree_map};
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::{Areas, Arena, InterfaceIndex};
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry};
use crate::packet::Options;
use crate::packet::lsa::{LsaKey, LsaRouterFlags, PrefixOptions};
use crate::southbound;
use crate::spf;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub prefix_options: PrefixOptions,
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey>,
    pub path_type: PathType,
    pub metric: u32,
    pub nexthops: Nexthops,
    pub flags: RouteNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
        const SUMMARIZED = 0x04;
    }
}

// Router routing table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub options: Options,
    pub flags: LsaRouterFlags,
    pub metric: u32,
    pub nexthops: Nexthops,
}

// Locally originated inter-area "network" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryNet {
    pub prefix_options: PrefixOptions,
    pub metric: u32,
}

// OSPF path types in decreasing order of preference.
//
// External paths are never computed since AS-external LSAs are neither
// originated nor processed.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Route nexthop key.
#[derive(Clone, Copy, Debug, Eq, new, Ord, PartialEq, PartialOrd)]
pub struct NexthopKey {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv6Addr>,
}

// Route nexthop.
#[derive(Clone, Copy, Debug, Eq, new, PartialEq)]
pub struct Nexthop {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv6Addr>,
    // Router-ID of the remote neighbor (`None` for connected routes).
    pub nbr_router_id: Option<Ipv4Addr>,
}

// Ordered list of nexthops.
pub type Nexthops = BTreeMap<NexthopKey, Nexthop>;

// ===== impl RouteNet =====

impl RouteNet {
    pub(crate) fn metric(&self) -> u32 {
        self.metric
    }
}

// ===== global functions =====

// Recomputes the entire OSPF routing table from the SPTs of all areas, and
// pushes the differences to the routing table sink.
pub(crate) fn update_rib(
    instance: &mut InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let mut rib = BTreeMap::new();
    let old_rib = std::mem::take(&mut instance.state.rib);

    // Compute intra-area routes.
    for area in areas.iter() {
        update_rib_intra_area(&mut rib, area, lsa_entries);
    }

    // Compute inter-area routes.
    //
    // If the router has active attachments to multiple areas, only backbone
    // Inter-Area-Prefix-LSAs are examined.
    let is_abr = areas.is_abr(interfaces);
    for area in areas.iter() {
        if is_abr && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(&mut rib, area, instance, lsa_entries);
    }

    // Examine transit areas' summary-LSAs.
    if is_abr {
        for area in areas
            .iter()
            .filter(|area| !area.is_backbone())
            .filter(|area| area.state.transit_capability)
        {
            recheck_transit_area(&mut rib, area, instance, lsa_entries);
        }
    }

    // Update OSPF routes in the global RIB.
    update_global_rib(&mut rib, old_rib, instance, interfaces);

    // Save updated RIB.
    instance.state.rib = rib;
}

// ===== helper functions =====

// Computes intra-area routes.
fn update_rib_intra_area(
    rib: &mut BTreeMap<Ipv6Network, RouteNet>,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Iterate over all stub networks and their corresponding vertices.
    for stub in spf::intra_area_networks(area, lsa_entries) {
        // Calculate stub metric.
        let metric = stub.vertex.distance.saturating_add(stub.metric.into());

        // Compare this distance to the current best cost to the stub network.
        if let Some(best_route) = rib.get(&stub.prefix)
            && metric > best_route.metric
        {
            continue;
        }

        // Get LS Origin.
        let origin = stub.vertex.origin();

        // If multiple transit vertices map to the same prefix (e.g. while a
        // new DR is being established), the Link State ID of the origin only
        // breaks ties between paths that are just as short.
        if !stub.vertex.lsa.is_router()
            && let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix)
        {
            if !transit_path_preferred(o.get(), metric, &origin) {
                continue;
            }
            o.remove();
        }

        // Create new intra-area route.
        let mut flags = RouteNetFlags::empty();
        if stub.vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
        }
        let new_route = RouteNet {
            prefix_options: stub.prefix_options,
            area_id: Some(area.area_id),
            origin: Some(origin),
            path_type: PathType::IntraArea,
            metric,
            nexthops: stub.vertex.nexthops.clone(),
            flags,
        };

        // Try to add or update stub route in the RIB.
        route_update(rib, stub.prefix, new_route);
    }
}

// Returns whether a path to a network through a transit vertex replaces its
// current routing table entry. At equal cost, the entry whose origin has the
// larger Link State ID wins.
fn transit_path_preferred(
    curr_route: &RouteNet,
    metric: u32,
    origin: &LsaKey,
) -> bool {
    match metric.cmp(&curr_route.metric) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => curr_route
            .origin
            .is_none_or(|curr_origin| origin.lsa_id >= curr_origin.lsa_id),
    }
}

// Computes inter-area "network" routes.
fn update_rib_inter_area_networks(
    rib: &mut BTreeMap<Ipv6Network, RouteNet>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let router_id = instance.state.router_id;
    for lsa in spf::inter_area_networks(area, lsa_entries)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.flags.is_abr())
        else {
            // If no such entry exists for router BR, do nothing with this
            // LSA and consider the next in the list.
            Debug::SpfNetworkUnreachableAbr(&lsa.prefix, lsa.adv_rtr).log();
            continue;
        };

        // The inter-area path cost is the distance to BR plus the cost
        // specified in the LSA.
        let metric = route_br.metric.saturating_add(lsa.metric);

        // Create new inter-area route.
        let new_route = RouteNet {
            prefix_options: lsa.prefix_options,
            area_id: Some(area.area_id),
            origin: None,
            path_type: PathType::InterArea,
            metric,
            nexthops: route_br.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        // Try to add or update summary route in the RIB.
        route_update(rib, lsa.prefix, new_route);
    }
}

// Checks whether the summaries of a transit area provide better paths than
// the ones computed so far (RFC 2328 - Section 16.3).
//
// Only inter-area routes and intra-area routes associated with the backbone
// are considered.
fn recheck_transit_area(
    rib: &mut BTreeMap<Ipv6Network, RouteNet>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let router_id = instance.state.router_id;
    for lsa in spf::inter_area_networks(area, lsa_entries)
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        let Some(route) = rib.get_mut(&lsa.prefix) else {
            continue;
        };
        let backbone_route = route.path_type == PathType::IntraArea
            && route.area_id == Some(Ipv4Addr::UNSPECIFIED);
        if route.path_type != PathType::InterArea && !backbone_route {
            continue;
        }

        // Look up the routing table entry for the advertising router in the
        // transit area.
        let Some(route_br) = area.state.routers.get(&lsa.adv_rtr) else {
            continue;
        };

        // Compare the cost of the transit path with the current one.
        let metric = route_br.metric.saturating_add(lsa.metric);
        match metric.cmp(&route.metric) {
            Ordering::Less => {
                route.metric = metric;
                route.nexthops = route_br.nexthops.clone();
            }
            Ordering::Equal => {
                route.nexthops.extend(route_br.nexthops.clone());
            }
            Ordering::Greater => (),
        }
    }
}

// Updates OSPF routes in the global RIB.
//
// This step is done at the end of the routing table calculation to prevent
// transient states from affecting the forwarding plane.
fn update_global_rib(
    rib: &mut BTreeMap<Ipv6Network, RouteNet>,
    mut old_rib: BTreeMap<Ipv6Network, RouteNet>,
    instance: &InstanceUpView<'_>,
    interfaces: &Arena<Interface>,
) {
    // Install new routes or routes that have changed.
    for (prefix, route) in rib.iter_mut() {
        let mut old_installed = false;

        // Remove route from the old RIB if it's present.
        if let Some(old_route) = old_rib.remove(prefix) {
            old_installed = old_route.flags.contains(RouteNetFlags::INSTALLED);

            // Skip reinstalling the route if it hasn't changed.
            if old_route.metric() == route.metric()
                && old_route.path_type == route.path_type
                && old_route.area_id == route.area_id
                && old_route.nexthops == route.nexthops
            {
                if old_installed {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
        }

        // The list of nexthops might be empty in the case of nexthop
        // computation errors (e.g. missing Link-LSAs). When that happens,
        // ensure the route is removed from the sink.
        if !route.nexthops.is_empty() {
            southbound::route_install(instance.sb, prefix, route, interfaces);
            route.flags.insert(RouteNetFlags::INSTALLED);
        } else if old_installed {
            southbound::route_uninstall(instance.sb, prefix);
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        southbound::route_uninstall(instance.sb, &prefix);
    }
}

fn route_update(
    rib: &mut BTreeMap<Ipv6Network, RouteNet>,
    prefix: Ipv6Network,
    route: RouteNet,
) {
    match rib.entry(prefix) {
        btree_map::Entry::Occupied(o) => {
            let curr_route = o.into_mut();

            match route_compare(&route, curr_route) {
                Ordering::Less => {
                    // Overwrite the current routing table entry.
                    *curr_route = route;
                }
                Ordering::Equal => {
                    // Merge nexthops.
                    curr_route.nexthops.extend(route.nexthops);
                }
                Ordering::Greater => {
                    // Ignore less preferred route.
                }
            }
        }
        btree_map::Entry::Vacant(v) => {
            v.insert(route);
        }
    }
}

// Paths are compared by type first, following the preference order of
// `PathType`, and by cost second.
fn route_compare(a: &RouteNet, b: &RouteNet) -> Ordering {
    let cmp = a.path_type.cmp(&b.path_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    a.metric.cmp(&b.metric)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::lsa::LsaType;

    fn route(path_type: PathType, metric: u32, addr: u16) -> RouteNet {
        let iface_idx = InterfaceIndex::from_raw_parts(0, 0);
        let addr = Some(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, addr));
        let mut nexthops = Nexthops::new();
        nexthops.insert(
            NexthopKey::new(iface_idx, addr),
            Nexthop::new(iface_idx, addr, None),
        );
        RouteNet {
            prefix_options: PrefixOptions::empty(),
            area_id: Some(Ipv4Addr::UNSPECIFIED),
            origin: None,
            path_type,
            metric,
            nexthops,
            flags: RouteNetFlags::empty(),
        }
    }

    #[test]
    fn intra_area_preferred() {
        let prefix: Ipv6Network = "2001:db8::/64".parse().unwrap();
        let mut rib = BTreeMap::new();
        route_update(&mut rib, prefix, route(PathType::InterArea, 1, 1));
        route_update(&mut rib, prefix, route(PathType::IntraArea, 100, 2));
        route_update(&mut rib, prefix, route(PathType::InterArea, 1, 3));
        let best = &rib[&prefix];
        assert_eq!(best.path_type, PathType::IntraArea);
        assert_eq!(best.metric, 100);
        assert_eq!(best.nexthops.len(), 1);
    }

    #[test]
    fn ecmp_merge_and_replace() {
        let prefix: Ipv6Network = "2001:db8::/64".parse().unwrap();
        let mut rib = BTreeMap::new();
        route_update(&mut rib, prefix, route(PathType::IntraArea, 20, 1));
        route_update(&mut rib, prefix, route(PathType::IntraArea, 20, 2));
        assert_eq!(rib[&prefix].nexthops.len(), 2);

        route_update(&mut rib, prefix, route(PathType::IntraArea, 10, 3));
        assert_eq!(rib[&prefix].metric, 10);
        assert_eq!(rib[&prefix].nexthops.len(), 1);
    }

    #[test]
    fn transit_path_tie_break() {
        let origin = |lsa_id: u32| {
            LsaKey::new(
                LsaType::NETWORK,
                Ipv4Addr::new(10, 0, 0, lsa_id as u8),
                Ipv4Addr::from(lsa_id),
            )
        };
        let mut curr_route = route(PathType::IntraArea, 20, 1);
        curr_route.origin = Some(origin(5));

        // A cheaper path wins regardless of the origin's Link State ID.
        assert!(transit_path_preferred(&curr_route, 10, &origin(1)));
        // A more expensive path never wins.
        assert!(!transit_path_preferred(&curr_route, 30, &origin(9)));
        // Equal-cost paths are decided by the Link State ID.
        assert!(transit_path_preferred(&curr_route, 20, &origin(9)));
        assert!(!transit_path_preferred(&curr_route, 20, &origin(1)));
    }

    #[test]
    fn path_type_preference() {
        assert!(PathType::IntraArea < PathType::InterArea);
        assert!(PathType::InterArea < PathType::Type1External);
        assert!(PathType::Type1External < PathType::Type2External);

        let prefix: Ipv6Network = "2001:db8::/64".parse().unwrap();
        let mut rib = BTreeMap::new();
        route_update(&mut rib, prefix, route(PathType::Type2External, 1, 1));
        route_update(&mut rib, prefix, route(PathType::Type1External, 50, 2));
        assert_eq!(rib[&prefix].path_type, PathType::Type1External);
        route_update(&mut rib, prefix, route(PathType::InterArea, 100, 3));
        assert_eq!(rib[&prefix].path_type, PathType::InterArea);
    }
}
