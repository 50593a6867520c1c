//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::Utc;
use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv6Network;

use crate::area::Area;
use crate::collections::Arena;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaKey, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaType, PrefixOptions,
};
use crate::route::{Nexthop, NexthopKey, Nexthops, PathType, RouteRtr};
use crate::{area, route};

// SPF vertex identifier.
//
// Router vertices are ordered before network vertices, so that a router is
// taken from the candidate list first when both are at the same distance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Router { router_id: Ipv4Addr },
    Network { router_id: Ipv4Addr, iface_id: u32 },
}

// LSA(s) describing an SPF vertex.
//
// All Router-LSAs of a given router are processed as an aggregate, treating
// them as fragments of a single large Router-LSA.
#[derive(Debug, Eq, PartialEq, EnumAsInner)]
pub enum VertexLsa {
    Router(Vec<Arc<Lsa>>),
    Network(Arc<Lsa>),
}

#[derive(Debug, new)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    pub hops: u16,
    #[new(default)]
    pub nexthops: Nexthops,
}

#[derive(Debug, new)]
pub struct SpfLink<'a> {
    pub parent_link: Option<&'a LsaRouterLink>,
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub cost: u32,
}

#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a> {
    pub vertex: &'a Vertex,
    pub prefix: Ipv6Network,
    pub prefix_options: PrefixOptions,
    pub metric: u16,
}

#[derive(Debug)]
pub struct SpfInterAreaNetwork {
    pub adv_rtr: Ipv4Addr,
    pub prefix: Ipv6Network,
    pub prefix_options: PrefixOptions,
    pub metric: u32,
}

// Vertex on the candidate list, along with all parents providing an
// equal-cost path to it.
#[derive(Debug)]
struct Candidate {
    vertex: Vertex,
    parents: Vec<(VertexId, Option<LsaRouterLink>)>,
}

// ===== impl VertexLsa =====

impl VertexLsa {
    fn router_bodies(&self) -> impl Iterator<Item = &LsaRouter> {
        self.as_router()
            .into_iter()
            .flatten()
            .filter_map(|lsa| lsa.body.as_router())
    }

    pub(crate) fn router_v_bit(&self) -> bool {
        self.router_bodies()
            .any(|lsa_body| lsa_body.flags.contains(LsaRouterFlags::V))
    }

    pub(crate) fn router_options(&self) -> Options {
        self.router_bodies()
            .next()
            .map(|lsa_body| lsa_body.options)
            .unwrap_or_default()
    }

    pub(crate) fn router_flags(&self) -> LsaRouterFlags {
        self.router_bodies()
            .next()
            .map(|lsa_body| lsa_body.flags)
            .unwrap_or_default()
    }
}

// ===== impl Vertex =====

impl Vertex {
    // Returns the Link State Origin of this vertex.
    pub(crate) fn origin(&self) -> LsaKey {
        match self.id {
            VertexId::Router { router_id } => {
                let lsa_id = self
                    .lsa
                    .as_router()
                    .and_then(|lsas| lsas.first())
                    .map(|lsa| lsa.hdr.lsa_id)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                LsaKey::new(LsaType::ROUTER, router_id, lsa_id)
            }
            VertexId::Network {
                router_id,
                iface_id,
            } => LsaKey::new(LsaType::NETWORK, router_id, iface_id.into()),
        }
    }
}

// ===== global functions =====

// Runs SPF on all areas and then updates the routing table and the
// Inter-Area-Prefix-LSAs originated by this router.
pub(crate) fn run(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    Debug::SpfStart.log();
    instance.state.spf_requested = false;

    // Compute the shortest-path tree of each area.
    for area_idx in arenas.areas.indexes().collect::<Vec<_>>() {
        let area = &mut arenas.areas[area_idx];
        run_area(area, instance, &arenas.interfaces, &arenas.lsa_entries);
    }

    // Compute the routing table.
    route::update_rib(
        instance,
        &arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Update the summaries advertised into each area.
    area::update_summary_lsas(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Update statistics.
    instance.state.spf_run_count += 1;
    instance.state.discontinuity_time = Utc::now();
    Debug::SpfFinish(instance.state.spf_run_count, instance.state.rib.len())
        .log();
}

// Returns an iterator over all intra-area networks, along with the SPT vertex
// each one is attached to.
pub(crate) fn intra_area_networks<'a>(
    area: &'a Area,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = SpfIntraAreaNetwork<'a>> + 'a {
    // Instead of examining the stub links within Router-LSAs, the list of
    // the area's Intra-Area-Prefix-LSAs is examined.
    area.state
        .lsdb
        .iter_by_type(lsa_entries, LsaType::INTRA_AREA_PREFIX)
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| lsa.body.as_intra_area_prefix())
        .filter_map(move |lsa_body| {
            // Find SPT vertex corresponding to the referenced LSA.
            let vid = if lsa_body.ref_lsa_type == LsaType::ROUTER {
                if lsa_body.ref_lsa_id != Ipv4Addr::UNSPECIFIED {
                    return None;
                }
                VertexId::Router {
                    router_id: lsa_body.ref_adv_rtr,
                }
            } else if lsa_body.ref_lsa_type == LsaType::NETWORK {
                VertexId::Network {
                    router_id: lsa_body.ref_adv_rtr,
                    iface_id: lsa_body.ref_lsa_id.into(),
                }
            } else {
                return None;
            };
            area.state
                .spt
                .get(&vid)
                .map(|vertex| (vertex, &lsa_body.prefixes))
        })
        .flat_map(|(vertex, prefixes)| {
            prefixes
                .iter()
                // A prefix advertisement whose NU-bit is set SHOULD NOT be
                // included in the routing calculation.
                .filter(|prefix| !prefix.options.contains(PrefixOptions::NU))
                .map(move |prefix| SpfIntraAreaNetwork {
                    vertex,
                    prefix: prefix.value,
                    prefix_options: prefix.options,
                    metric: prefix.metric,
                })
        })
}

// Returns an iterator over all inter-area networks advertised into the given
// area.
pub(crate) fn inter_area_networks<'a>(
    area: &'a Area,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = SpfInterAreaNetwork> + 'a {
    area.state
        .lsdb
        .iter_by_type(lsa_entries, LsaType::INTER_AREA_PREFIX)
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let lsa_body = lsa.body.as_inter_area_prefix()?;
            (!lsa_body.prefix_options.contains(PrefixOptions::NU)).then_some(
                SpfInterAreaNetwork {
                    adv_rtr: lsa.hdr.adv_rtr,
                    prefix: lsa_body.prefix,
                    prefix_options: lsa_body.prefix_options,
                    metric: lsa_body.metric,
                },
            )
        })
}

// ===== helper functions =====

fn run_area(
    area: &mut Area,
    instance: &mut InstanceUpView<'_>,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    area.state.transit_capability = false;
    area.state.routers.clear();

    // Inactive areas have an empty SPT.
    if !area.is_active(interfaces) {
        area.state.spt.clear();
        return;
    }

    // Get root vertex. If our own Router-LSA wasn't originated yet, do it
    // now. Its installation will request a new SPF run.
    let root_vid = VertexId::Router {
        router_id: instance.state.router_id,
    };
    let Some(root_vlsa) = vertex_lsa_find(root_vid, area, lsa_entries) else {
        Error::SpfRootNotFound(area.area_id).log();
        area.state.spt.clear();
        instance
            .tx
            .lsa_orig_event(LsaOriginateEvent::AreaStart { area_id: area.id });
        return;
    };
    let root_v = Candidate {
        vertex: Vertex::new(root_vid, root_vlsa, 0, 0),
        parents: vec![],
    };

    // Initialize SPT and candidate list.
    let mut spt: BTreeMap<VertexId, Vertex> = BTreeMap::new();
    let mut cand_list = BTreeMap::new();
    let mut cand_dist = BTreeMap::new();
    cand_dist.insert(root_vid, 0);
    cand_list.insert((0, root_vid), root_v);

    // Main SPF loop.
    while let Some(((_, vertex_id), cand)) = cand_list.pop_first() {
        cand_dist.remove(&vertex_id);
        let mut vertex = cand.vertex;

        // Now that all parents are on the SPT, compute the vertex's nexthops.
        for (parent_id, parent_link) in &cand.parents {
            let Some(parent) = spt.get(parent_id) else {
                continue;
            };
            if let Some(nexthops) = calc_nexthops(
                area,
                parent,
                parent_link.as_ref(),
                &vertex.lsa,
                interfaces,
                lsa_entries,
            ) {
                vertex.nexthops.extend(nexthops);
            }
        }

        if let VertexId::Router { router_id } = vertex.id {
            // Add "router" routing table entry.
            let route = RouteRtr::new(
                area.area_id,
                PathType::IntraArea,
                vertex.lsa.router_options(),
                vertex.lsa.router_flags(),
                vertex.distance,
                vertex.nexthops.clone(),
            );
            area.state.routers.insert(router_id, route);

            // Set TransitCapability.
            if vertex.lsa.router_v_bit() {
                area.state.transit_capability = true;
            }
        }

        // Iterate over all links described by the vertex's LSA.
        for link in vertex_lsa_links(&vertex.lsa, area, lsa_entries) {
            if link.id == vertex.id {
                continue;
            }

            // Check if the LSAs are mutually linked.
            if !vertex_lsa_links(&link.lsa, area, lsa_entries)
                .any(|back_link| back_link.id == vertex.id)
            {
                continue;
            }

            // Calculate distance to the link's vertex.
            let distance = vertex.distance.saturating_add(link.cost);

            // Check if the link's vertex is already on the shortest-path tree.
            // An equal-cost path found after the vertex was taken off the
            // candidate list still contributes its nexthops.
            if let Some(spt_v) = spt.get_mut(&link.id) {
                if spt_v.distance == distance
                    && let Some(nexthops) = calc_nexthops(
                        area,
                        &vertex,
                        link.parent_link,
                        &spt_v.lsa,
                        interfaces,
                        lsa_entries,
                    )
                {
                    spt_v.nexthops.extend(nexthops);
                }
                continue;
            }

            // Increment number of hops to the root.
            let mut hops = vertex.hops;
            if link.lsa.is_router() {
                hops = hops.saturating_add(1);
            }

            // Check if this vertex is already present on the candidate list.
            if let Some(cand_distance) = cand_dist.get(&link.id).copied() {
                match distance.cmp(&cand_distance) {
                    Ordering::Less => {
                        // Remove vertex since its key has changed. It will be
                        // re-added with the correct key below.
                        cand_list.remove(&(cand_distance, link.id));
                    }
                    Ordering::Equal => {}
                    Ordering::Greater => {
                        // Ignore higher cost path.
                        continue;
                    }
                }
            }
            cand_dist.insert(link.id, distance);
            let cand_v =
                cand_list
                    .entry((distance, link.id))
                    .or_insert_with(|| Candidate {
                        vertex: Vertex::new(link.id, link.lsa, distance, hops),
                        parents: vec![],
                    });
            cand_v.vertex.hops = cand_v.vertex.hops.min(hops);
            cand_v.parents.push((vertex.id, link.parent_link.cloned()));
        }

        // Add vertex to SPT.
        spt.insert(vertex.id, vertex);
    }

    // Update area's SPT.
    area.state.spt = spt;

    // Update statistics.
    area.state.spf_run_count += 1;
    area.state.discontinuity_time = Utc::now();
}

// Finds the LSA(s) describing the given vertex.
//
// MaxAge LSAs are ignored, and so are Router-LSAs without the R and V6 bits.
fn vertex_lsa_find(
    id: VertexId,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<VertexLsa> {
    match id {
        VertexId::Network {
            router_id,
            iface_id,
        } => {
            // Network-LSAs are always standalone.
            let lsa_key = LsaKey::new(
                LsaType::NETWORK,
                router_id,
                Ipv4Addr::from(iface_id),
            );
            area.state
                .lsdb
                .get(lsa_entries, &lsa_key)
                .map(|(_, lse)| &lse.data)
                .filter(|lsa| !lsa.hdr.is_maxage())
                .cloned()
                .map(VertexLsa::Network)
        }
        VertexId::Router { router_id } => {
            let lsas = area
                .state
                .lsdb
                .iter_by_type_advrtr(lsa_entries, LsaType::ROUTER, router_id)
                .map(|(_, lse)| &lse.data)
                .filter(|lsa| !lsa.hdr.is_maxage())
                .filter(|lsa| {
                    lsa.body.as_router().is_some_and(|lsa_body| {
                        lsa_body.options.contains(Options::R | Options::V6)
                    })
                })
                .cloned()
                .collect::<Vec<_>>();

            (!lsas.is_empty()).then_some(VertexLsa::Router(lsas))
        }
    }
}

// Returns an iterator over all links of the provided SPF vertex.
//
// Links pointing to vertices whose LSAs aren't present in the LSDB yet are
// skipped.
fn vertex_lsa_links<'a>(
    vertex_lsa: &'a VertexLsa,
    area: &'a Area,
    lsa_entries: &'a Arena<LsaEntry>,
) -> Box<dyn Iterator<Item = SpfLink<'a>> + 'a> {
    match vertex_lsa {
        VertexLsa::Network(lsa) => {
            let iter = lsa
                .body
                .as_network()
                .into_iter()
                .flat_map(|lsa_body| lsa_body.attached_rtrs.iter())
                .filter_map(move |router_id| {
                    let link_vid = VertexId::Router {
                        router_id: *router_id,
                    };
                    vertex_lsa_find(link_vid, area, lsa_entries).map(
                        |link_vlsa| SpfLink::new(None, link_vid, link_vlsa, 0),
                    )
                });
            Box::new(iter)
        }
        VertexLsa::Router(lsas) => {
            let iter = lsas
                .iter()
                .filter_map(|lsa| lsa.body.as_router())
                .flat_map(|lsa_body| lsa_body.links.iter())
                .filter_map(|link| {
                    let link_vid = match link.link_type {
                        LsaRouterLinkType::PointToPoint => VertexId::Router {
                            router_id: link.nbr_router_id,
                        },
                        LsaRouterLinkType::TransitNetwork => {
                            VertexId::Network {
                                router_id: link.nbr_router_id,
                                iface_id: link.nbr_iface_id,
                            }
                        }
                        // Virtual links aren't supported.
                        LsaRouterLinkType::VirtualLink => return None,
                    };
                    Some((link, link_vid))
                })
                .filter_map(move |(link, link_vid)| {
                    vertex_lsa_find(link_vid, area, lsa_entries).map(
                        |link_vlsa| {
                            SpfLink::new(
                                Some(link),
                                link_vid,
                                link_vlsa,
                                link.metric.into(),
                            )
                        },
                    )
                });
            Box::new(iter)
        }
    }
}

// Computes the set of nexthops that should be used to reach the given
// destination through the given parent.
//
// Returns `None` when the nexthops can't be determined yet (e.g. the
// neighbor's Link-LSA wasn't received).
fn calc_nexthops(
    area: &Area,
    parent: &Vertex,
    parent_link: Option<&LsaRouterLink>,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<Nexthops> {
    // If there is at least one intervening router in the current shortest
    // path between the destination and the root, the destination simply
    // inherits the set of next hops from the parent.
    if parent.hops != 0 {
        return Some(parent.nexthops.clone());
    }

    let mut nexthops = Nexthops::new();
    match &parent.lsa {
        // The parent vertex is the root.
        VertexLsa::Router(_) => {
            // The destination is either a directly connected network or
            // directly connected router. The outgoing interface in this case
            // is simply the OSPF interface connecting to the destination.
            let parent_link = parent_link?;
            let (iface_idx, iface) = area
                .interfaces
                .get_by_ifindex(interfaces, parent_link.iface_id)?;

            match dest_lsa {
                VertexLsa::Router(_) => {
                    let nbr_router_id = parent_link.nbr_router_id;
                    let addr = nexthop_lladdr(
                        iface,
                        nbr_router_id,
                        parent_link.nbr_iface_id,
                        lsa_entries,
                    )?;
                    nexthops.insert(
                        NexthopKey::new(iface_idx, Some(addr)),
                        Nexthop::new(
                            iface_idx,
                            Some(addr),
                            Some(nbr_router_id),
                        ),
                    );
                }
                VertexLsa::Network(_) => {
                    nexthops.insert(
                        NexthopKey::new(iface_idx, None),
                        Nexthop::new(iface_idx, None, None),
                    );
                }
            }
        }
        // The parent vertex is a network that directly connects the
        // calculating router to the destination router.
        VertexLsa::Network(parent_lsa) => {
            // The nexthop is given by the destination's link pointing back to
            // the parent network.
            let dest_lsas = dest_lsa.as_router()?;
            let nbr_router_id = dest_lsas.first()?.hdr.adv_rtr;
            let dest_link = dest_lsas
                .iter()
                .filter_map(|lsa| lsa.body.as_router())
                .flat_map(|lsa_body| lsa_body.links.iter())
                .find(|link| {
                    link.link_type == LsaRouterLinkType::TransitNetwork
                        && link.nbr_router_id == parent_lsa.hdr.adv_rtr
                        && Ipv4Addr::from(link.nbr_iface_id)
                            == parent_lsa.hdr.lsa_id
                })?;

            // Inherit outgoing interface from the parent network.
            let iface_idx = parent.nexthops.values().next()?.iface_idx;
            let iface = interfaces.get(iface_idx)?;

            let addr = nexthop_lladdr(
                iface,
                nbr_router_id,
                dest_link.iface_id,
                lsa_entries,
            )?;
            nexthops.insert(
                NexthopKey::new(iface_idx, Some(addr)),
                Nexthop::new(iface_idx, Some(addr), Some(nbr_router_id)),
            );
        }
    }

    Some(nexthops)
}

// Looks up the link-local address of a neighbor through its Link-LSA.
fn nexthop_lladdr(
    iface: &Interface,
    nbr_router_id: Ipv4Addr,
    nbr_iface_id: u32,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<Ipv6Addr> {
    let lsa_key =
        LsaKey::new(LsaType::LINK, nbr_router_id, Ipv4Addr::from(nbr_iface_id));
    iface
        .state
        .lsdb
        .get(lsa_entries, &lsa_key)
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .and_then(|lsa| lsa.body.as_link())
        .map(|lsa_body| lsa_body.linklocal)
}
