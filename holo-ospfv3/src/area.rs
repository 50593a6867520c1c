//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use holo_utils::ip::Ipv6NetworkExt;
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, Interfaces, Lsdb, LsdbId,
};
use crate::configuration::AreaCfg;
use crate::debug::LsaFlushReason;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry, LsaEntryFlags};
use crate::origination;
use crate::packet::Options;
use crate::packet::lsa::{LsaKey, LsaType};
use crate::route::{
    Nexthops, PathType, RouteNetFlags, RouteRtr, SummaryNet,
};
use crate::spf::{Vertex, VertexId};

// OSPFv3 area.
#[derive(Debug)]
pub struct Area {
    // ID.
    pub id: AreaId,
    // Area ID.
    pub area_id: Ipv4Addr,
    // Area configuration data.
    pub config: AreaCfg,
    // Area state data.
    pub state: AreaState,
    // Area interfaces.
    pub interfaces: Interfaces,
}

#[derive(Debug)]
pub struct AreaState {
    // LSDB of area-scope LSAs.
    pub lsdb: Lsdb,
    // Indicates whether the area can carry data traffic that neither
    // originates nor terminates in the area itself.
    pub transit_capability: bool,
    // Shortest-path tree.
    pub spt: BTreeMap<VertexId, Vertex>,
    // Table of all routers in the area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr>,
    // Largest cost among the intra-area routes covered by each active
    // address range.
    pub ranges: BTreeMap<Ipv6Network, u32>,
    // Table of summaries originated into this area.
    pub net_summaries: BTreeMap<Ipv6Network, (u32, SummaryNet)>,
    // Next Inter-Area-Prefix-LSA ID.
    pub next_inter_area_prefix_id: u32,
    // Number of LSAs originated per LSA type.
    pub orig_counts: BTreeMap<LsaType, u32>,
    // Statistics.
    pub spf_run_count: u32,
    pub discontinuity_time: DateTime<Utc>,
}

// OSPFv3 area type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaType {
    #[default]
    Normal,
    Stub,
    TotallyStub,
    // Accepted for compatibility, handled as a stub area.
    Nssa,
}

// ===== impl Area =====

impl Area {
    pub(crate) fn new(id: AreaId, config: AreaCfg) -> Area {
        Area {
            id,
            area_id: config.area_id,
            config,
            state: Default::default(),
            interfaces: Default::default(),
        }
    }

    // Returns whether this area is active.
    //
    // An area is active as long as it contains at least one operational
    // interface.
    pub(crate) fn is_active(&self, interfaces: &Arena<Interface>) -> bool {
        self.interfaces
            .iter(interfaces)
            .any(|iface| !iface.is_down())
    }

    // Returns whether this is the backbone area.
    pub(crate) fn is_backbone(&self) -> bool {
        self.area_id == Ipv4Addr::UNSPECIFIED
    }

    // Returns whether inter-area summaries are advertised into this area.
    pub(crate) fn summary_enabled(&self) -> bool {
        self.config.summary && self.config.area_type != AreaType::TotallyStub
    }

    // Returns the options used in Hello and Database Description packets, and
    // in the Router, Network and Link LSAs originated into this area.
    pub(crate) fn options(&self) -> Options {
        let mut options = Options::R | Options::V6;

        if self.config.area_type == AreaType::Normal {
            options.insert(Options::E);
        }

        options
    }

    // Returns the number of ABR routers in this area.
    pub(crate) fn abr_count(&self) -> usize {
        self.state
            .routers
            .values()
            .filter(|router| router.path_type == PathType::IntraArea)
            .filter(|router| router.flags.is_abr())
            .count()
    }
}

// ===== impl AreaState =====

impl Default for AreaState {
    fn default() -> AreaState {
        AreaState {
            lsdb: Default::default(),
            transit_capability: false,
            spt: Default::default(),
            routers: Default::default(),
            ranges: Default::default(),
            net_summaries: Default::default(),
            next_inter_area_prefix_id: 0,
            orig_counts: Default::default(),
            spf_run_count: 0,
            discontinuity_time: Utc::now(),
        }
    }
}

// ===== global functions =====

// (Re)originates or flushes the Inter-Area-Prefix-LSAs of all areas according
// to the current routing table.
pub(crate) fn update_summary_lsas(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Check ABR status.
    let is_abr = areas.is_abr(interfaces);

    // Update address ranges.
    for route in instance.state.rib.values_mut() {
        route.flags.remove(RouteNetFlags::SUMMARIZED);
    }
    let area_idxs = areas.indexes().collect::<Vec<_>>();
    for area_idx in area_idxs.iter().copied() {
        update_net_ranges(&mut areas[area_idx], is_abr, instance);
    }

    for area_idx in area_idxs {
        update_net_summary_lsas(
            area_idx,
            is_abr,
            instance,
            areas,
            interfaces,
            lsa_entries,
        );
    }
}

fn update_net_ranges(
    area: &mut Area,
    is_abr: bool,
    instance: &mut InstanceUpView<'_>,
) {
    area.state.ranges.clear();

    // Address ranges only take effect on ABRs.
    if !is_abr {
        return;
    }

    for (prefix, route) in instance
        .state
        .rib
        .iter_mut()
        // Select intra-area routes from this area.
        .filter(|(_, route)| route.path_type == PathType::IntraArea)
        .filter(|(_, route)| route.area_id == Some(area.area_id))
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
    {
        // Nested ranges are collapsed into the outermost one.
        if let Some(range_prefix) = area
            .config
            .ranges
            .keys()
            .filter(|range_prefix| range_covers(range_prefix, prefix))
            .min_by_key(|range_prefix| range_prefix.prefix())
        {
            route.flags.insert(RouteNetFlags::SUMMARIZED);

            let cost = area.state.ranges.entry(*range_prefix).or_default();
            *cost = std::cmp::max(*cost, route.metric);
        }
    }
}

fn update_net_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries =
        compute_net_summaries(is_abr, area, instance, areas, interfaces);

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.net_summaries);

    // (Re)originate the required Inter-Area-Prefix-LSAs.
    area.state.net_summaries = new_summaries
        .into_iter()
        .map(|(prefix, new_summary)| {
            let lsa_id = match old_summaries.remove(&prefix) {
                Some((old_lsa_id, old_summary)) => {
                    // Reoriginate summary LSA if the route has changed, reusing
                    // the previous LSA-ID.
                    if new_summary != old_summary {
                        origination::lsa_orig_inter_area_prefix(
                            area,
                            instance,
                            prefix,
                            Some(old_lsa_id),
                            &new_summary,
                        );
                    }
                    old_lsa_id
                }
                None => {
                    // Originate new summary LSA.
                    origination::lsa_orig_inter_area_prefix(
                        area,
                        instance,
                        prefix,
                        None,
                        &new_summary,
                    )
                }
            };

            (prefix, (lsa_id, new_summary))
        })
        .collect();

    // Flush old summaries that are no longer valid.
    let lsa_ids = old_summaries.into_values().map(|(lsa_id, _)| lsa_id);
    flush_summary_lsas(lsa_ids, area, instance, lsa_entries);
}

fn compute_net_summaries(
    is_abr: bool,
    area: &Area,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &Arena<Interface>,
) -> Vec<(Ipv6Network, SummaryNet)> {
    let mut summaries = vec![];

    // Only ABRs should originate summaries, and only into active areas.
    if !is_abr || !area.is_active(interfaces) {
        return summaries;
    }

    // Add regular summaries and ranges, except for totally stub areas.
    if area.summary_enabled() {
        summaries.extend(compute_net_regular_summaries(area, instance));
        summaries.extend(compute_net_range_summaries(area, areas));
    }

    // Add default route for stub areas.
    if area.config.area_type != AreaType::Normal {
        let prefix = Ipv6Network::default_route();
        let default_summary = SummaryNet {
            prefix_options: Default::default(),
            metric: area.config.default_cost,
        };
        summaries.push((prefix, default_summary));
    }

    summaries
}

fn compute_net_regular_summaries<'a>(
    area: &'a Area,
    instance: &'a InstanceUpView<'_>,
) -> impl Iterator<Item = (Ipv6Network, SummaryNet)> + 'a {
    instance
        .state
        .rib
        .iter()
        // AS external routes are never advertised in summaries.
        .filter(|(_, route)| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Skip route if it's associated with the area itself.
        .filter(|(_, route)| route.area_id != Some(area.area_id))
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Routes covered by an address range are advertised through the
        // range, except for backbone routes going into transit areas.
        .filter(|(_, route)| {
            !route.flags.contains(RouteNetFlags::SUMMARIZED)
                || (route.area_id == Some(Ipv4Addr::UNSPECIFIED)
                    && area.state.transit_capability)
        })
        // Check if the nexthops associated with this route belong to
        // the area. This is the logical equivalent of a Distance
        // Vector protocol's split horizon logic.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        .map(|(prefix, route)| {
            let summary = SummaryNet {
                prefix_options: route.prefix_options,
                metric: route.metric,
            };
            (*prefix, summary)
        })
}

fn compute_net_range_summaries<'a>(
    area: &'a Area,
    areas: &'a Areas,
) -> impl Iterator<Item = (Ipv6Network, SummaryNet)> + 'a {
    areas
        .iter()
        // Check all other areas.
        .filter(|other_area| other_area.area_id != area.area_id)
        // The backbone's ranges are ignored when originating summaries into
        // transit areas.
        .filter(|other_area| {
            !(other_area.is_backbone() && area.state.transit_capability)
        })
        .flat_map(|other_area| {
            other_area
                .state
                .ranges
                .iter()
                .filter_map(|(range_prefix, cost)| {
                    let range = other_area.config.ranges.get(range_prefix)?;
                    // Ranges set to no-advertise hide the covered routes.
                    if !range.advertise {
                        return None;
                    }
                    let summary = SummaryNet {
                        prefix_options: Default::default(),
                        metric: range.cost.unwrap_or(*cost),
                    };
                    Some((*range_prefix, summary))
                })
        })
}

// Returns whether the address range covers the given prefix.
fn range_covers(range: &Ipv6Network, prefix: &Ipv6Network) -> bool {
    range.prefix() <= prefix.prefix() && range.contains(prefix.network())
}

fn nexthops_area_check(nexthops: &Nexthops, area: &Area) -> bool {
    nexthops.values().any(|nexthop| {
        area.interfaces
            .indexes()
            .any(|iface_idx| nexthop.iface_idx == iface_idx)
    })
}

fn flush_summary_lsas(
    lsa_ids: impl Iterator<Item = u32>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let adv_rtr = instance.state.router_id;
    let lsa_type = LsaType::INTER_AREA_PREFIX;

    // Flush previously originated summaries that are no longer valid.
    for lsa_id in lsa_ids {
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id.into());
        if let Some((_, lse)) = area.state.lsdb.get(lsa_entries, &lsa_key) {
            instance.tx.lsa_flush(
                lsdb_id,
                lse.id,
                LsaFlushReason::PrematureAging,
            );
        }
    }

    // Flush received self-originated summaries that are no longer valid.
    let active = area
        .state
        .net_summaries
        .values()
        .map(|(lsa_id, _)| Ipv4Addr::from(*lsa_id))
        .collect::<BTreeSet<_>>();
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(lsa_entries, lsa_type, adv_rtr)
        .filter(|(_, lse)| lse.flags.contains(LsaEntryFlags::RECEIVED))
        .filter(|(_, lse)| !active.contains(&lse.data.hdr.lsa_id))
    {
        instance.tx.lsa_flush(
            lsdb_id,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_options() {
        let mut config = AreaCfg::default();
        let area = Area::new(1, config.clone());
        assert_eq!(area.options(), Options::R | Options::V6 | Options::E);
        assert!(area.is_backbone());
        assert!(area.summary_enabled());

        config.area_id = Ipv4Addr::new(0, 0, 0, 1);
        config.area_type = AreaType::TotallyStub;
        let area = Area::new(2, config);
        assert_eq!(area.options(), Options::R | Options::V6);
        assert!(!area.is_backbone());
        assert!(!area.summary_enabled());
    }
}
