//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use holo_utils::ip::{Ipv6AddrExt, Ipv6NetworkExt};
use ipnetwork::Ipv6Network;
use itertools::Itertools;

use crate::area::Area;
use crate::collections::{LsaEntryId, LsdbId, LsdbIndex, lsdb_get};
use crate::debug::LsaFlushReason;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{LsaOriginateEvent, MAX_LINK_METRIC};
use crate::neighbor::nsm;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaFunctionCode, LsaHdr, LsaInterAreaPrefix,
    LsaIntraAreaPrefix, LsaIntraAreaPrefixEntry, LsaKey, LsaLink,
    LsaLinkPrefix, LsaNetwork, LsaRouter, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaType, PrefixOptions,
};
use crate::route::SummaryNet;

// Link State IDs of the Intra-Area-Prefix-LSAs that don't fit in the first
// LSA of their referenced LSA are allocated above this value.
const IAP_OVERFLOW_LSA_ID: u32 = 0x8000_0000;

// ===== global functions =====

// Reacts to an event that might require LSAs to be (re)originated or
// flushed.
//
// LSAs aren't originated here directly. Instead, origination requests are
// queued so that they're processed with mutable access to the LSDBs.
pub(crate) fn lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    match event {
        LsaOriginateEvent::AreaStart { area_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;

            // Originate Router-LSA(s) and Intra-Area-Prefix-LSA(s).
            lsa_orig_router(area, instance, arenas);
            lsa_orig_intra_area_prefix(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceStateChange { area_id, iface_id } => {
            // (Re)originate Router-LSA(s) in all areas since the ABR status
            // might have changed.
            for area in arenas.areas.iter() {
                lsa_orig_router(area, instance, arenas);
            }

            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

            // (Re)originate or flush Network-LSA.
            lsa_orig_or_flush_network(iface, area, instance, arenas);

            // (Re)originate or flush Link-LSA.
            if iface.state.ism_state >= ism::State::Waiting {
                lsa_orig_link(iface, area, instance);
            } else {
                lsa_flush_link(iface, area, instance, arenas);
            }

            // (Re)originate Intra-Area-Prefix-LSA(s).
            lsa_orig_intra_area_prefix(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceDrChange { area_id, iface_id }
        | LsaOriginateEvent::NeighborToFromFull { area_id, iface_id } => {
            // (Re)originate Router-LSA(s).
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);

            // (Re)originate or flush Network-LSA.
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            lsa_orig_or_flush_network(iface, area, instance, arenas);

            // (Re)originate Intra-Area-Prefix-LSA(s).
            lsa_orig_intra_area_prefix(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceAddrAddDel { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

            // (Re)originate Link-LSA.
            if iface.state.ism_state >= ism::State::Waiting {
                lsa_orig_link(iface, area, instance);
            }

            // (Re)originate Intra-Area-Prefix-LSA(s).
            lsa_orig_intra_area_prefix(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceCostChange { area_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;

            // (Re)originate Router-LSA(s).
            lsa_orig_router(area, instance, arenas);

            // (Re)originate Intra-Area-Prefix-LSA(s).
            lsa_orig_intra_area_prefix(area, instance, arenas);
        }
        LsaOriginateEvent::NeighborInterfaceIdChange { area_id, .. } => {
            // (Re)originate Router-LSA(s).
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);
        }
        LsaOriginateEvent::LinkLsaRcvd { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

            // The DR advertises the prefixes of all fully adjacent routers
            // on behalf of the link.
            if iface.state.ism_state == ism::State::Dr {
                if has_full_nbr(iface, arenas) {
                    lsa_orig_network(iface, area, instance, arenas);
                }
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
        }
        LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id } => {
            // Check if the received self-originated LSA needs to be
            // reoriginated or flushed.
            process_self_originated_lsa(instance, arenas, lsdb_id, lse_id)?;
        }
        LsaOriginateEvent::StubRouterChange => {
            // (Re)originate Router-LSA(s) in all areas.
            for area in arenas.areas.iter() {
                lsa_orig_router(area, instance, arenas);
            }
        }
    }

    Ok(())
}

// (Re)originates the Inter-Area-Prefix-LSA describing the given summary.
//
// Returns the Link State ID of the LSA, which is allocated from the area's
// counter when not provided.
pub(crate) fn lsa_orig_inter_area_prefix(
    area: &mut Area,
    instance: &InstanceUpView<'_>,
    prefix: Ipv6Network,
    lsa_id: Option<u32>,
    summary: &SummaryNet,
) -> u32 {
    let lsdb_id = LsdbId::Area(area.id);

    // Get LSA-ID.
    let lsa_id = match lsa_id {
        Some(lsa_id) => lsa_id,
        None => {
            area.state.next_inter_area_prefix_id += 1;
            area.state.next_inter_area_prefix_id
        }
    };

    // (Re)originate Inter-Area-Prefix-LSA.
    let lsa_body = LsaBody::InterAreaPrefix(LsaInterAreaPrefix::new(
        summary.metric,
        summary.prefix_options,
        prefix,
    ));
    instance.tx.lsa_orig_check(lsdb_id, lsa_id.into(), lsa_body);

    lsa_id
}

// ===== helper functions =====

fn lsa_orig_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let router_id = instance.state.router_id;

    // Router-LSA's options and flags.
    let options = area.options();
    let mut flags = LsaRouterFlags::empty();
    if arenas.areas.is_abr(&arenas.interfaces) {
        flags.insert(LsaRouterFlags::B);
    }

    // Router-LSA's links.
    let mut links = vec![];
    for iface in area
        .interfaces
        .iter(&arenas.interfaces)
        // Skip interfaces in the "Down" or "Loopback" states.
        .filter(|iface| {
            !matches!(
                iface.state.ism_state,
                ism::State::Down | ism::State::Loopback
            )
        })
        // Skip interfaces without any full adjacencies.
        .filter(|iface| has_full_nbr(iface, arenas))
    {
        let Some(ifindex) = iface.system.ifindex else {
            continue;
        };

        // When stub-router is configured (RFC 6987), set the cost of all
        // links to MaxLinkMetric.
        let cost = if instance.config.stub_router {
            MAX_LINK_METRIC
        } else {
            iface.config.metric()
        };

        match iface.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::Virtual => {
                // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                for nbr in iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .filter(|nbr| nbr.state == nsm::State::Full)
                {
                    let Some(nbr_iface_id) = nbr.iface_id else {
                        continue;
                    };
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        cost,
                        ifindex,
                        nbr_iface_id,
                        nbr.router_id,
                    ));
                }
            }
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                let (dr_router_id, dr_iface_id) =
                    if iface.state.ism_state == ism::State::Dr {
                        // The router itself is the DR.
                        (router_id, ifindex)
                    } else {
                        match iface
                            .state
                            .dr
                            .and_then(|dr| {
                                iface
                                    .state
                                    .neighbors
                                    .get_by_router_id(&arenas.neighbors, dr)
                            })
                            .filter(|(_, nbr)| nbr.state == nsm::State::Full)
                            .and_then(|(_, nbr)| {
                                nbr.iface_id.map(|id| (nbr.router_id, id))
                            }) {
                            Some(dr) => dr,
                            // Not fully adjacent to the DR.
                            None => continue,
                        }
                    };

                // Add a Type-2 (transit) link.
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::TransitNetwork,
                    cost,
                    ifindex,
                    dr_iface_id,
                    dr_router_id,
                ));
            }
        }
    }

    // Originate as many Router-LSAs as necessary.
    let mut lsa_id: u32 = 0;
    let mut originate_fn = |links: Vec<LsaRouterLink>| {
        let lsa_body = LsaBody::Router(LsaRouter::new(flags, options, links));
        instance.tx.lsa_orig_check(lsdb_id, lsa_id.into(), lsa_body);
        lsa_id += 1;
    };
    if links.is_empty() {
        originate_fn(links);
    } else {
        let max_links = (Lsa::MAX_LENGTH
            - LsaHdr::LENGTH as usize
            - LsaRouter::BASE_LENGTH as usize)
            / LsaRouterLink::LENGTH as usize;
        for links in links.into_iter().chunks(max_links).into_iter() {
            originate_fn(links.collect());
        }
    }

    // Flush self-originated Router-LSAs that are no longer needed.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(&arenas.lsa_entries, LsaType::ROUTER, router_id)
        .filter(|(_, lse)| lse.data.hdr.lsa_id >= Ipv4Addr::from(lsa_id))
    {
        lsa_flush(instance, lsdb_id, lse.id);
    }
}

fn lsa_orig_or_flush_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    if iface.state.ism_state == ism::State::Dr && has_full_nbr(iface, arenas)
    {
        lsa_orig_network(iface, area, instance, arenas);
    } else {
        lsa_flush_network(iface, area, instance, arenas);
    }
}

fn lsa_orig_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // An IPv6 network-LSA's Link State ID is set to the Interface ID of the
    // Designated Router on the link.
    let Some(ifindex) = iface.system.ifindex else {
        return;
    };

    // Network-LSA's attached routers.
    let myself = instance.state.router_id;
    let nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id);
    let attached_rtrs = std::iter::once(myself).chain(nbrs).collect();

    // (Re)originate Network-LSA.
    let lsa_body =
        LsaBody::Network(LsaNetwork::new(area.options(), attached_rtrs));
    instance
        .tx
        .lsa_orig_check(lsdb_id, Ipv4Addr::from(ifindex), lsa_body);
}

fn lsa_flush_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let Some(ifindex) = iface.system.ifindex else {
        return;
    };

    let lsa_key = LsaKey::new(
        LsaType::NETWORK,
        instance.state.router_id,
        Ipv4Addr::from(ifindex),
    );
    if let Some((_, lse)) = area.state.lsdb.get(&arenas.lsa_entries, &lsa_key) {
        lsa_flush(instance, LsdbId::Area(area.id), lse.id);
    }
}

fn lsa_orig_link(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let lsdb_id = LsdbId::Link(area.id, iface.id);

    // The Link State ID is set to the router's Interface ID on the link.
    let Some(ifindex) = iface.system.ifindex else {
        return;
    };
    let Some(linklocal) = iface.system.linklocal_addr else {
        return;
    };

    // Link-LSA's prefixes.
    let prefixes = iface
        .system
        .addr_list
        .iter()
        .filter(|addr| !addr.ip().is_link_local())
        .map(|addr| {
            LsaLinkPrefix::new(PrefixOptions::empty(), addr.apply_mask())
        })
        .collect();

    // (Re)originate Link-LSA.
    let lsa_body = LsaBody::Link(LsaLink::new(
        iface.config.priority,
        area.options(),
        linklocal,
        prefixes,
    ));
    instance
        .tx
        .lsa_orig_check(lsdb_id, Ipv4Addr::from(ifindex), lsa_body);
}

fn lsa_flush_link(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let Some(ifindex) = iface.system.ifindex else {
        return;
    };

    let lsa_key = LsaKey::new(
        LsaType::LINK,
        instance.state.router_id,
        Ipv4Addr::from(ifindex),
    );
    if let Some((_, lse)) = iface.state.lsdb.get(&arenas.lsa_entries, &lsa_key)
    {
        lsa_flush(instance, LsdbId::Link(area.id, iface.id), lse.id);
    }
}

fn lsa_orig_intra_area_prefix(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let adv_rtr = instance.state.router_id;
    let mut adv_list = vec![];

    // Router's attached stub links and looped-back interfaces.
    let mut prefixes = vec![];
    for (iface, addr) in area
        .interfaces
        .iter(&arenas.interfaces)
        // Skip interfaces in the "Down" state.
        .filter(|iface| !iface.is_down())
        // Skip interfaces reported as transit networks in the Router-LSA.
        .filter(|iface| !is_transit(iface, arenas))
        .flat_map(|iface| {
            iface.system.addr_list.iter().map(move |addr| (iface, addr))
        })
        .filter(|(_, addr)| !addr.ip().is_link_local())
    {
        let entry = if iface.state.ism_state == ism::State::Loopback
            || iface.config.if_type == InterfaceType::PointToMultipoint
        {
            // Host routes with the LA-bit set and a zero metric.
            LsaIntraAreaPrefixEntry::new(
                PrefixOptions::LA,
                addr.ip().to_host_prefix(),
                0,
            )
        } else {
            // The metric of the link prefixes is the interface's output
            // cost.
            LsaIntraAreaPrefixEntry::new(
                PrefixOptions::empty(),
                addr.apply_mask(),
                iface.config.metric(),
            )
        };
        prefixes.push(entry);
    }
    let ref_lsa = LsaKey::new(LsaType::ROUTER, adv_rtr, Ipv4Addr::UNSPECIFIED);
    adv_list.push((ref_lsa, prefixes));

    // Designated Router's attached links.
    for iface in area
        .interfaces
        .iter(&arenas.interfaces)
        .filter(|iface| iface.state.ism_state == ism::State::Dr)
        .filter(|iface| has_full_nbr(iface, arenas))
    {
        let Some(ifindex) = iface.system.ifindex else {
            continue;
        };

        // Our own prefixes on the link.
        let mut prefixes: BTreeMap<Ipv6Network, PrefixOptions> = iface
            .system
            .addr_list
            .iter()
            .filter(|addr| !addr.ip().is_link_local())
            .map(|addr| (addr.apply_mask(), PrefixOptions::empty()))
            .collect();

        // Prefixes advertised in the Link-LSAs of the fully adjacent
        // routers.
        for prefix in iface
            .state
            .lsdb
            .iter_by_type(&arenas.lsa_entries, LsaType::LINK)
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| !lsa.hdr.is_maxage())
            // The Link State ID must match the neighbor's Interface ID.
            .filter(|lsa| {
                iface
                    .state
                    .neighbors
                    .get_by_router_id(&arenas.neighbors, lsa.hdr.adv_rtr)
                    .filter(|(_, nbr)| nbr.state == nsm::State::Full)
                    .is_some_and(|(_, nbr)| {
                        nbr.iface_id.map(Ipv4Addr::from)
                            == Some(lsa.hdr.lsa_id)
                    })
            })
            .filter_map(|lsa| lsa.body.as_link())
            .flat_map(|link_lsa| link_lsa.prefixes.iter())
            // Filter out prefixes with the NU/LA options.
            .filter(|prefix| {
                !prefix
                    .options
                    .intersects(PrefixOptions::NU | PrefixOptions::LA)
            })
            .filter(|prefix| !prefix.value.ip().is_link_local())
        {
            // PrefixOptions fields are logically OR'ed together.
            *prefixes.entry(prefix.value.apply_mask()).or_default() |=
                prefix.options;
        }

        // The Metric field for all prefixes is set to 0.
        let prefixes = prefixes
            .into_iter()
            .map(|(prefix, options)| {
                LsaIntraAreaPrefixEntry::new(options, prefix, 0)
            })
            .collect();
        let ref_lsa =
            LsaKey::new(LsaType::NETWORK, adv_rtr, Ipv4Addr::from(ifindex));
        adv_list.push((ref_lsa, prefixes));
    }

    // Originate as many Intra-Area-Prefix-LSAs as necessary.
    //
    // The first LSA of each referenced LSA uses the Link State ID of the
    // latter, so that prefix changes don't renumber unrelated LSAs. Prefixes
    // that don't fit in a single LSA spill over to IDs of the overflow range.
    let max_prefixes = (Lsa::MAX_LENGTH
        - LsaHdr::LENGTH as usize
        - LsaIntraAreaPrefix::BASE_LENGTH as usize)
        / LsaIntraAreaPrefixEntry::MAX_LENGTH;
    let mut lsa_ids = BTreeSet::new();
    let mut overflow_id = IAP_OVERFLOW_LSA_ID;
    for (ref_lsa, prefixes) in adv_list {
        let chunks = prefixes.into_iter().chunks(max_prefixes);
        for (chunk, prefixes) in chunks.into_iter().enumerate() {
            let lsa_id = if chunk == 0 {
                ref_lsa.lsa_id
            } else {
                overflow_id += 1;
                Ipv4Addr::from(overflow_id)
            };
            let lsa_body = LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::new(
                ref_lsa.lsa_type,
                ref_lsa.lsa_id,
                ref_lsa.adv_rtr,
                prefixes.collect(),
            ));
            instance.tx.lsa_orig_check(lsdb_id, lsa_id, lsa_body);
            lsa_ids.insert(lsa_id);
        }
    }

    // Flush self-originated Intra-Area-Prefix-LSAs that are no longer needed,
    // including the ones that would be left without any prefix.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(
            &arenas.lsa_entries,
            LsaType::INTRA_AREA_PREFIX,
            adv_rtr,
        )
        .filter(|(_, lse)| !lsa_ids.contains(&lse.data.hdr.lsa_id))
    {
        lsa_flush(instance, lsdb_id, lse.id);
    }
}

fn process_self_originated_lsa(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    let mut flush = false;

    // Lookup LSDB and LSA entry.
    let (lsdb_idx, lsdb) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;
    let (_, lse) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;
    let lsa = &lse.data;

    // Check LSA type.
    match lsa.hdr.lsa_type.function_code() {
        Some(LsaFunctionCode::Router) => {
            if let LsdbIndex::Area(area_idx) = lsdb_idx {
                // Reoriginate Router-LSA.
                let area = &arenas.areas[area_idx];
                lsa_orig_router(area, instance, arenas);
            }
        }
        Some(LsaFunctionCode::Network) => {
            // Check if the router is still the DR for the network.
            match lsdb_idx {
                LsdbIndex::Area(area_idx) => match arenas.areas[area_idx]
                    .interfaces
                    .iter(&arenas.interfaces)
                    .find(|iface| {
                        iface.system.ifindex.map(Ipv4Addr::from)
                            == Some(lsa.hdr.lsa_id)
                    })
                    .filter(|iface| iface.state.ism_state == ism::State::Dr)
                    .filter(|iface| has_full_nbr(iface, arenas))
                {
                    // Reoriginate Network-LSA.
                    Some(iface) => {
                        let area = &arenas.areas[area_idx];
                        lsa_orig_network(iface, area, instance, arenas)
                    }
                    None => flush = true,
                },
                _ => flush = true,
            }
        }
        Some(
            LsaFunctionCode::InterAreaPrefix | LsaFunctionCode::InterAreaRouter,
        ) => {
            // Do nothing. These LSAs will be either reoriginated or flushed
            // once SPF runs and the routing table is computed.
        }
        Some(LsaFunctionCode::Link) => match lsdb_idx {
            LsdbIndex::Link(area_idx, iface_idx)
                if arenas.interfaces[iface_idx].state.ism_state
                    >= ism::State::Waiting =>
            {
                // Reoriginate Link-LSA.
                let area = &arenas.areas[area_idx];
                let iface = &arenas.interfaces[iface_idx];
                lsa_orig_link(iface, area, instance);
            }
            _ => flush = true,
        },
        Some(LsaFunctionCode::IntraAreaPrefix) => {
            if let LsdbIndex::Area(area_idx) = lsdb_idx {
                // Reoriginate Intra-Area-Prefix-LSA(s).
                let area = &arenas.areas[area_idx];
                lsa_orig_intra_area_prefix(area, instance, arenas);
            }
        }
        _ => {
            // AS-External and NSSA LSAs aren't originated by this router, and
            // neither are LSAs of unknown types.
            flush = true;
        }
    }

    if flush {
        lsa_flush(instance, lsdb_id, lse_id);
    }

    Ok(())
}

fn lsa_flush(
    instance: &InstanceUpView<'_>,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) {
    instance
        .tx
        .lsa_flush(lsdb_id, lse_id, LsaFlushReason::PrematureAging);
}

// Returns whether the interface has at least one fully adjacent neighbor.
fn has_full_nbr(iface: &Interface, arenas: &InstanceArenas) -> bool {
    iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .any(|nbr| nbr.state == nsm::State::Full)
}

// Returns whether the interface is described as a transit network in the
// Router-LSA.
fn is_transit(iface: &Interface, arenas: &InstanceArenas) -> bool {
    if !iface.is_broadcast_or_nbma() {
        return false;
    }

    if iface.state.ism_state == ism::State::Dr {
        return has_full_nbr(iface, arenas);
    }

    iface
        .state
        .dr
        .and_then(|dr| {
            iface.state.neighbors.get_by_router_id(&arenas.neighbors, dr)
        })
        .is_some_and(|(_, nbr)| nbr.state == nsm::State::Full)
}
