//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::area::{Area, AreaType};
use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, InterfaceId, InterfaceIndex, LsaEntryId,
    LsaEntryIndex, Lsdb, LsdbId, LsdbIndex, NeighborIndex, lsdb_index,
    lsdb_index_mut,
};
use crate::debug::{Debug, LsaFlushReason};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::neighbor::nsm;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaFunctionCode, LsaHdr, LsaKey, LsaScope, LsaType,
};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_CHECK_AGE: u16 = 300;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u64 = 5;
pub const LSA_MIN_ARRIVAL: u64 = 1;
pub const MAX_LINK_METRIC: u16 = 0xffff;

#[derive(Debug)]
pub struct LsaEntry {
    // LSA ID.
    pub id: LsaEntryId,
    // LSA data.
    pub data: Arc<Lsa>,
    // Instance clock value when this LSA instance was installed.
    pub installed_at: u64,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub enum LsaOriginateEvent {
    AreaStart {
        area_id: AreaId,
    },
    InterfaceStateChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceDrChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceAddrAddDel {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceCostChange {
        area_id: AreaId,
    },
    NeighborToFromFull {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    NeighborInterfaceIdChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    LinkLsaRcvd {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    SelfOriginatedLsaRcvd {
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
    },
    StubRouterChange,
}

// LSA whose origination was postponed by the MinLSInterval check.
#[derive(Debug)]
pub struct LsaDelayedOrig {
    pub data: Lsa,
    // Instance clock value at which the LSA can be originated.
    pub due: u64,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(
        id: LsaEntryId,
        data: Arc<Lsa>,
        installed_at: u64,
    ) -> LsaEntry {
        LsaEntry {
            id,
            data,
            installed_at,
            flags: Default::default(),
        }
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in Section
// 13.1 of RFC 2328.
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Compares two LSAs according to the rules specified in Section 13.2 of RFC
// 2328. Its purpose is to determine if the contents of the LSAs are identical.
//
// OSPFv3 carries the options inside the LSA body, so they're covered by the
// byte comparison.
pub(crate) fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    if a.hdr.is_maxage() ^ b.hdr.is_maxage() {
        return false;
    }

    if a.hdr.length != b.hdr.length {
        return false;
    }

    let hdr_length = LsaHdr::LENGTH as usize;
    a.raw.get(hdr_length..) == b.raw.get(hdr_length..)
}

// Checks if the given LSA was received via flooding less than MinLSArrival
// seconds ago.
pub(crate) fn lsa_min_arrival_check(lse: &LsaEntry, now: u64) -> bool {
    lse.flags.contains(LsaEntryFlags::RECEIVED)
        && now.saturating_sub(lse.installed_at) < LSA_MIN_ARRIVAL
}

// Checks if the given LSA was originated less than MinLSInterval seconds ago.
fn lsa_min_orig_interval_check(lse: &LsaEntry, now: u64) -> bool {
    !lse.flags.contains(LsaEntryFlags::RECEIVED)
        && now.saturating_sub(lse.installed_at) < LSA_MIN_INTERVAL
}

// Checks if the provided area can accept the given LSA type.
pub(crate) fn lsa_type_is_valid(
    area_type: Option<AreaType>,
    lsa_type: LsaType,
) -> bool {
    // Reject LSAs of unknown (reserved) scope.
    if lsa_type.scope() == LsaScope::Unknown {
        return false;
    }

    // Reject AS-scoped and Inter-Area-Router LSAs (as per errata 3746 of RFC
    // 2328) on stub areas.
    if let Some(area_type) = area_type
        && area_type != AreaType::Normal
        && (lsa_type.scope() == LsaScope::As
            || lsa_type.function_code()
                == Some(LsaFunctionCode::InterAreaRouter))
    {
        return false;
    }

    true
}

// For IPv6, self-originated LSAs are those LSAs whose Advertising Router is
// equal to the router's own Router ID.
pub(crate) fn lsa_is_self_originated(lsa: &Lsa, router_id: Ipv4Addr) -> bool {
    lsa.hdr.adv_rtr == router_id
}

// Returns the LSDB index corresponding to the provided LSA type, as seen from
// the given interface.
pub(crate) fn lsdb_idx_by_lsa_type(
    area_idx: AreaIndex,
    iface_idx: InterfaceIndex,
    lsa_type: LsaType,
) -> Option<LsdbIndex> {
    match lsa_type.scope() {
        LsaScope::Link => Some(LsdbIndex::Link(area_idx, iface_idx)),
        LsaScope::Area => Some(LsdbIndex::Area(area_idx)),
        LsaScope::As => Some(LsdbIndex::As),
        LsaScope::Unknown => None,
    }
}

// Looks up an LSA in the given LSDB.
pub(crate) fn find<'a>(
    lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
    key: &LsaKey,
) -> Option<&'a Arc<Lsa>> {
    lsdb.get(lsa_entries, key).map(|(_, lse)| &lse.data)
}

// Looks up an LSA in the LSDB that corresponds to its flooding scope, as seen
// from the given interface.
pub(crate) fn find_scoped<'a>(
    key: &LsaKey,
    iface: &'a Interface,
    area: &'a Area,
    as_lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
) -> Option<&'a LsaEntry> {
    let lsdb = match key.lsa_type.scope() {
        LsaScope::Link => &iface.state.lsdb,
        LsaScope::Area => &area.state.lsdb,
        LsaScope::As => as_lsdb,
        LsaScope::Unknown => return None,
    };
    lsdb.get(lsa_entries, key).map(|(_, lse)| lse)
}

// Installs the provided LSA to the specified LSDB.
//
// Returns the index of the new LSA entry and whether its contents differ from
// the previous instance (if any).
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Arc<Lsa>,
) -> (LsaEntryIndex, bool) {
    Debug::LsaInstall(&lsa.hdr).log();

    // Remove old instance (if any) from all neighbors' Link state
    // retransmission lists.
    let lsa_key = lsa.hdr.key();
    rxmt_lists_remove(instance, arenas, lsdb_idx, &lsa_key);

    // Lookup LSDB.
    let (lsdb_id, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );

    // Remove old instance of the LSA.
    let old_lsa = match lsdb.get(&arenas.lsa_entries, &lsa_key) {
        Some((old_lse_idx, old_lse)) => {
            let old_lsa = old_lse.data.clone();
            lsdb.delete(&mut arenas.lsa_entries, old_lse_idx);
            Some(old_lsa)
        }
        None => None,
    };

    // Add LSA entry to LSDB.
    let (lse_idx, lse) = lsdb.insert(
        &mut arenas.lsa_entries,
        lsa.clone(),
        instance.state.clock,
    );

    // Check if the LSA is self-originated and mark it as such.
    if lsa_is_self_originated(&lse.data, instance.state.router_id) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }

    // RFC 2328 - Section 13.2:
    // "The contents of the new LSA should be compared to the old instance, if
    // present. If there is no difference, there is no need to recalculate the
    // routing table".
    //
    // Additionally, do not recalculate the routing table in the following
    // cases:
    // * The type of the new LSA is unknown
    // * The new LSA is a self-originated summary
    let content_change = match &old_lsa {
        Some(old_lsa) => !lsa_same_contents(old_lsa, &lsa),
        None => true,
    };
    let self_orig_summary = lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
        && (lsa_key.lsa_type == LsaType::INTER_AREA_PREFIX
            || lsa_key.lsa_type == LsaType::INTER_AREA_ROUTER);
    let route_recalc =
        content_change && !lsa.body.is_unknown() && !self_orig_summary;

    // Link-LSAs feed the Intra-Area-Prefix-LSAs originated by the DR.
    if let LsdbId::Link(area_id, iface_id) = lsdb_id
        && lsa_key.lsa_type == LsaType::LINK
    {
        let event = LsaOriginateEvent::LinkLsaRcvd { area_id, iface_id };
        instance.tx.lsa_orig_event(event);
    }

    // Schedule SPF run if necessary.
    if route_recalc {
        instance.state.spf_requested = true;
    }

    (lse_idx, content_change)
}

// Originates the provided LSA.
pub(crate) fn originate(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Lsa,
) {
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );

    // When an attempt is made to increment the sequence number past the
    // maximum value of MaxSequenceNumber, the current instance of the LSA
    // must first be flushed from the routing domain. This is done by
    // prematurely aging the LSA and reflooding it. As soon as this flood
    // has been acknowledged by all adjacent neighbors, a new instance can
    // be originated with sequence number of InitialSequenceNumber.
    let lsa_key = lsa.hdr.key();
    if lsa.hdr.seq_no == LSA_RESERVED_SEQ_NO {
        if let Some((old_lse_idx, old_lse)) =
            lsdb.get(&arenas.lsa_entries, &lsa_key)
        {
            Debug::LsaSeqNoWrap(&old_lse.data.hdr).log();

            // Record LSA that will be originated later and then flush the
            // existing instance.
            lsdb.seqno_wrapping.insert(lsa_key, lsa);
            let reason = LsaFlushReason::PrematureAging;
            flush(instance, arenas, lsdb_idx, old_lse_idx, reason);
        }
        return;
    }

    Debug::LsaOriginate(&lsa.hdr).log();

    let (lse_idx, _) = install(instance, arenas, lsdb_idx, Arc::new(lsa));

    let lse = &arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lse.data,
        None,
    );

    // Update statistics.
    let lsa_type = lse.data.hdr.lsa_type;
    match lsdb_idx {
        LsdbIndex::Link(area_idx, _) | LsdbIndex::Area(area_idx) => {
            let area = &mut arenas.areas[area_idx];
            *area.state.orig_counts.entry(lsa_type).or_default() += 1;
        }
        LsdbIndex::As => (),
    }
    instance.state.orig_lsa_count += 1;
    instance.state.discontinuity_time = Utc::now();
}

// Attempts to originate the provided LSA, but only if it passes a few checks.
pub(crate) fn originate_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) {
    let now = instance.state.clock;
    let adv_rtr = instance.state.router_id;
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    let lsa_key = LsaKey::new(lsa_body.lsa_type(), adv_rtr, lsa_id);

    // Get next sequence number.
    let old_lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);
    let seq_no = old_lse
        .map(|old_lse| old_lse.data.hdr.seq_no.wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);

    // Make new LSA.
    let lsa = Lsa::new(0, lsa_id, adv_rtr, seq_no, lsa_body);

    // Check if an instance of this LSA already exists in the LSDB.
    if let Some(old_lse) = old_lse {
        // If an LSA with identical contents already exists in the LSDB, skip
        // originating a new one (as per section 12.4 of RFC 2328).
        //
        // However, if the database copy was received through flooding, proceed
        // to originate a new instance with an updated sequence number.
        if lsa_same_contents(&old_lse.data, &lsa)
            && !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
        {
            return;
        }

        // Perform the MinLSInterval check.
        if lsdb.delayed_orig.contains_key(&lsa_key)
            || lsa_min_orig_interval_check(old_lse, now)
        {
            Debug::LsaOriginateMinInterval(&lsa.hdr).log();

            let due = old_lse.installed_at + LSA_MIN_INTERVAL;
            match lsdb.delayed_orig.entry(lsa_key) {
                btree_map::Entry::Occupied(mut o) => {
                    // Update the LSA that will be originated, but keep the
                    // current deadline.
                    let ldo = o.get_mut();
                    ldo.data = lsa;
                }
                btree_map::Entry::Vacant(v) => {
                    v.insert(LsaDelayedOrig { data: lsa, due });
                }
            }
            return;
        }
    }

    // Effectively originate the LSA.
    originate(instance, arenas, lsdb_idx, lsa);
}

// Flushes LSA from the LSDB.
pub(crate) fn flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lse_idx: LsaEntryIndex,
    reason: LsaFlushReason,
) {
    // Do not flush the same LSA more than once.
    let lse = &arenas.lsa_entries[lse_idx];
    if lse.data.hdr.is_maxage() {
        return;
    }

    debug_assert!(
        reason != LsaFlushReason::PrematureAging
            || lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
    );

    Debug::LsaFlush(&lse.data.hdr, reason).log();

    // Set the LSA age to MaxAge.
    let mut lsa = (*lse.data).clone();
    lsa.set_maxage();
    let lsa = Arc::new(lsa);
    let lsa_key = lsa.hdr.key();

    // Install updated LSA to clear rxmt lists and rerun route calculations.
    let (lse_idx, _) = install(instance, arenas, lsdb_idx, lsa);

    // Reflood updated LSA.
    let lse = &arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lse.data,
        None,
    );

    // Remove pending LSA origination, if any.
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    lsdb.delayed_orig.remove(&lsa_key);
}

// Flushes all self-originated LSAs from the LSDB.
pub(crate) fn flush_all_self_originated(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let reason = LsaFlushReason::PrematureAging;
    let idxs = lsdb_indexes(&arenas.areas)
        .into_iter()
        .flat_map(|lsdb_idx| {
            let (_, lsdb) = lsdb_index(
                &instance.state.lsdb,
                &arenas.areas,
                &arenas.interfaces,
                lsdb_idx,
            );
            lsdb.iter(&arenas.lsa_entries)
                .filter(|(_, lse)| {
                    lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                })
                .map(|(lse_idx, _)| (lsdb_idx, lse_idx))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    // Flush LSAs.
    for (lsdb_idx, lse_idx) in idxs {
        flush(instance, arenas, lsdb_idx, lse_idx, reason);
    }
}

// Advances the LSDB clock by one second.
//
// Ages every stored LSA, refreshes self-originated LSAs, floods expired LSAs,
// removes MaxAge LSAs that are no longer needed and originates LSAs whose
// MinLSInterval delay has elapsed.
pub(crate) fn age_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    instance.state.clock += 1;

    for lsdb_idx in lsdb_indexes(&arenas.areas) {
        maxage_sweep(instance, arenas, lsdb_idx);
        age_lsdb(instance, arenas, lsdb_idx);
        delayed_orig_drain(instance, arenas, lsdb_idx);
    }
}

// ===== helper functions =====

// Returns the indexes of all LSDBs, AS-scope first.
fn lsdb_indexes(areas: &Areas) -> Vec<LsdbIndex> {
    let mut idxs = vec![LsdbIndex::As];
    for area_idx in areas.indexes() {
        let area = &areas[area_idx];
        idxs.push(LsdbIndex::Area(area_idx));
        idxs.extend(
            area.interfaces
                .indexes()
                .map(|iface_idx| LsdbIndex::Link(area_idx, iface_idx)),
        );
    }
    idxs
}

// Returns all neighbors that belong to the flooding scope of the given LSDB.
pub(crate) fn lsdb_scope_neighbors(
    areas: &Areas,
    interfaces: &Arena<Interface>,
    lsdb_idx: LsdbIndex,
) -> Vec<(AreaIndex, InterfaceIndex, NeighborIndex)> {
    let mut nbrs = vec![];
    for area_idx in areas.indexes() {
        // Filter by LSA area.
        match lsdb_idx {
            LsdbIndex::Link(lsdb_area_idx, _)
            | LsdbIndex::Area(lsdb_area_idx) => {
                if area_idx != lsdb_area_idx {
                    continue;
                }
            }
            LsdbIndex::As => (),
        }

        let area = &areas[area_idx];
        for iface_idx in area.interfaces.indexes() {
            // Filter by LSA interface.
            if let LsdbIndex::Link(_, lsdb_iface_idx) = lsdb_idx
                && iface_idx != lsdb_iface_idx
            {
                continue;
            }

            let iface = &interfaces[iface_idx];
            nbrs.extend(
                iface
                    .state
                    .neighbors
                    .indexes()
                    .map(|nbr_idx| (area_idx, iface_idx, nbr_idx)),
            );
        }
    }
    nbrs
}

// Removes the given LSA from all neighbors' Link state retransmission lists.
fn rxmt_lists_remove(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa_key: &LsaKey,
) {
    for (area_idx, iface_idx, nbr_idx) in
        lsdb_scope_neighbors(&arenas.areas, &arenas.interfaces, lsdb_idx)
    {
        let area = &arenas.areas[area_idx];
        let iface = &arenas.interfaces[iface_idx];
        let nbr = &mut arenas.neighbors[nbr_idx];
        if nbr.lists.ls_rxmt.remove(lsa_key).is_some() {
            nbr.rxmt_lsupd_stop_check(iface, area, instance);
        }
    }
}

// Removes MaxAge LSAs from the LSDB once they're no longer needed.
//
// A MaxAge LSA is kept while any neighbor in the flooding scope is in the
// Exchange or Loading states, or while it's still on a retransmission list.
// Self-originated LSAs waiting for a sequence number wrap are reoriginated
// instead.
fn maxage_sweep(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
) {
    let nbrs =
        lsdb_scope_neighbors(&arenas.areas, &arenas.interfaces, lsdb_idx);
    if nbrs.iter().any(|(_, _, nbr_idx)| {
        matches!(
            arenas.neighbors[*nbr_idx].state,
            nsm::State::Exchange | nsm::State::Loading
        )
    }) {
        return;
    }

    let (_, lsdb) = lsdb_index(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_idx,
    );
    let lsa_keys = lsdb
        .maxage_lsas
        .iter()
        .filter(|lsa_key| {
            !nbrs.iter().any(|(_, _, nbr_idx)| {
                arenas.neighbors[*nbr_idx].lists.ls_rxmt.contains_key(lsa_key)
            })
        })
        .copied()
        .collect::<Vec<_>>();

    for lsa_key in lsa_keys {
        let (_, lsdb) = lsdb_index_mut(
            &mut instance.state.lsdb,
            &mut arenas.areas,
            &mut arenas.interfaces,
            lsdb_idx,
        );
        let Some((lse_idx, _)) = lsdb.get(&arenas.lsa_entries, &lsa_key)
        else {
            lsdb.maxage_lsas.remove(&lsa_key);
            continue;
        };

        // Delete or originate new instance of the LSA depending whether it's
        // wrapping its sequence number.
        if let Some(lsa) = lsdb.seqno_wrapping.remove(&lsa_key) {
            let lsa = Lsa::new(
                0,
                lsa.hdr.lsa_id,
                lsa.hdr.adv_rtr,
                LSA_INIT_SEQ_NO,
                lsa.body,
            );
            originate(instance, arenas, lsdb_idx, lsa);
        } else {
            let lse = &arenas.lsa_entries[lse_idx];
            Debug::LsaMaxAgeRemove(&lse.data.hdr).log();
            lsdb.delete(&mut arenas.lsa_entries, lse_idx);
            instance.state.spf_requested = true;
        }
    }
}

// Increments the age of all LSAs from the given LSDB.
fn age_lsdb(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
) {
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );

    let mut refresh = vec![];
    let mut expired = vec![];
    for lse_idx in lsdb.indexes().collect::<Vec<_>>() {
        let lse = &arenas.lsa_entries[lse_idx];
        if lse.data.hdr.is_maxage() {
            continue;
        }

        let age = lse.data.hdr.age + 1;
        let self_originated =
            lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED);
        lsdb.set_age(&mut arenas.lsa_entries, lse_idx, age);

        // Refresh and expiry fire on the tick the age reaches the threshold.
        if self_originated && age >= LSA_REFRESH_TIME {
            refresh.push(lse_idx);
        } else if age >= LSA_MAX_AGE {
            expired.push(lse_idx);
        }
    }

    // Originate new instances of the self-originated LSAs that reached
    // LSRefreshTime.
    for lse_idx in refresh {
        let lse = &arenas.lsa_entries[lse_idx];
        Debug::LsaRefresh(&lse.data.hdr).log();

        let lsa = Lsa::new(
            0,
            lse.data.hdr.lsa_id,
            lse.data.hdr.adv_rtr,
            lse.data.hdr.seq_no.wrapping_add(1),
            lse.data.body.clone(),
        );
        originate(instance, arenas, lsdb_idx, lsa);
    }

    // Flood LSAs that reached MaxAge so they can be removed from the routing
    // domain.
    for lse_idx in expired {
        let lse = &arenas.lsa_entries[lse_idx];
        Debug::LsaFlush(&lse.data.hdr, LsaFlushReason::Expiry).log();
        flood(
            instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_idx,
            &lse.data,
            None,
        );
        instance.state.spf_requested = true;
    }
}

// Originates the LSAs whose MinLSInterval delay has elapsed.
fn delayed_orig_drain(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
) {
    let now = instance.state.clock;
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    let due = lsdb
        .delayed_orig
        .iter()
        .filter(|(_, ldo)| ldo.due <= now)
        .map(|(lsa_key, _)| *lsa_key)
        .collect::<Vec<_>>();
    let lsas = due
        .into_iter()
        .filter_map(|lsa_key| lsdb.delayed_orig.remove(&lsa_key))
        .collect::<Vec<_>>();

    for ldo in lsas {
        originate(instance, arenas, lsdb_idx, ldo.data);
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
        LsaHdr {
            age,
            lsa_type: LsaType::ROUTER,
            lsa_id: Ipv4Addr::UNSPECIFIED,
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 24,
        }
    }

    #[test]
    fn compare_seqno() {
        // Sequence numbers are compared as signed integers.
        let a = hdr(LSA_INIT_SEQ_NO, 0, 0);
        let b = hdr(LSA_INIT_SEQ_NO + 1, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Less);
        let a = hdr(0xffffffff, 0, 0);
        let b = hdr(0, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Less);
        let a = hdr(LSA_MAX_SEQ_NO, 0, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn compare_cksum_and_age() {
        let a = hdr(LSA_INIT_SEQ_NO, 0x10, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0x20, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Less);

        // MaxAge wins.
        let a = hdr(LSA_INIT_SEQ_NO, 0x10, LSA_MAX_AGE);
        let b = hdr(LSA_INIT_SEQ_NO, 0x10, 10);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);

        // The younger copy wins when the ages differ by more than MaxAgeDiff.
        let a = hdr(LSA_INIT_SEQ_NO, 0x10, 100);
        let b = hdr(LSA_INIT_SEQ_NO, 0x10, 100 + LSA_MAX_AGE_DIFF + 1);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // Otherwise they're the same instance.
        let b = hdr(LSA_INIT_SEQ_NO, 0x10, 100 + LSA_MAX_AGE_DIFF);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn lsa_type_validity() {
        assert!(lsa_type_is_valid(None, LsaType::AS_EXTERNAL));
        assert!(lsa_type_is_valid(
            Some(AreaType::Normal),
            LsaType::AS_EXTERNAL
        ));
        assert!(!lsa_type_is_valid(Some(AreaType::Stub), LsaType::AS_EXTERNAL));
        assert!(!lsa_type_is_valid(
            Some(AreaType::TotallyStub),
            LsaType::INTER_AREA_ROUTER
        ));
        assert!(lsa_type_is_valid(
            Some(AreaType::Stub),
            LsaType::INTER_AREA_PREFIX
        ));
        assert!(!lsa_type_is_valid(None, LsaType(0x6001)));
    }
}
