//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::sync::Arc;

use crate::area::Area;
use crate::collections::{
    Areas, Arena, InterfaceIndex, LsdbIndex, NeighborIndex,
};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::Lsa;

// ===== global functions =====

// Floods the given LSA over its flooding scope (RFC 2328 - Section 13.3).
//
// `src` identifies the interface and neighbor the LSA was received from, if
// any. Returns whether the LSA was flooded back out the receiving interface.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsdb_idx: LsdbIndex,
    lsa: &Arc<Lsa>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let mut flooded_back = false;

    // The scope of the LSDB already reflects the U-bit and the S1/S2 bits of
    // the LSA type.
    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            let area = &areas[area_idx];
            flooded_back |= flood_interface(
                iface_idx, area, instance, interfaces, neighbors, lsa, src,
            );
        }
        LsdbIndex::Area(area_idx) => {
            let area = &areas[area_idx];
            for iface_idx in area.interfaces.indexes() {
                flooded_back |= flood_interface(
                    iface_idx, area, instance, interfaces, neighbors, lsa, src,
                );
            }
        }
        LsdbIndex::As => {
            // AS-scope LSAs aren't flooded into stub areas.
            for area in areas.iter().filter(|area| {
                lsdb::lsa_type_is_valid(
                    Some(area.config.area_type),
                    lsa.hdr.lsa_type,
                )
            }) {
                for iface_idx in area.interfaces.indexes() {
                    flooded_back |= flood_interface(
                        iface_idx, area, instance, interfaces, neighbors, lsa,
                        src,
                    );
                }
            }
        }
    }

    flooded_back
}

// ===== helper functions =====

fn flood_interface(
    iface_idx: InterfaceIndex,
    area: &Area,
    instance: &InstanceUpView<'_>,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Arc<Lsa>,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let iface = &mut interfaces[iface_idx];
    let lsa_key = lsa.hdr.key();

    // 1) Each of the neighbors attached to this interface are examined.
    let mut rxmt_added = false;
    for nbr_idx in iface.state.neighbors.indexes().collect::<Vec<_>>() {
        let nbr = &mut neighbors[nbr_idx];

        // 1.a) Skip neighbors in a lesser state than Exchange.
        if nbr.state < nsm::State::Exchange {
            continue;
        }

        // 1.b) Adjacencies that are not full might still be requesting this
        // LSA.
        if nbr.state != nsm::State::Full {
            let requested = nbr
                .lists
                .ls_request
                .get(&lsa_key)
                .or_else(|| nbr.lists.ls_request_pending.get(&lsa_key))
                .map(|req_hdr| lsdb::lsa_compare(&lsa.hdr, req_hdr));
            match requested {
                // The neighbor has a more recent instance.
                Some(Ordering::Less) => continue,
                Some(cmp) => {
                    nbr.lists.ls_request.remove(&lsa_key);
                    nbr.lists.ls_request_pending.remove(&lsa_key);
                    nbr.loading_done_check(iface, area, instance);

                    // Same instance: nothing else to do for this neighbor.
                    if cmp == Ordering::Equal {
                        continue;
                    }
                }
                None => (),
            }
        }

        // 1.c) Don't send the LSA back to the neighbor it came from.
        if src.is_some_and(|(_, src_nbr_idx)| src_nbr_idx == nbr_idx) {
            continue;
        }

        // 1.d) Add LSA to the neighbor's rxmt list (or update the old
        // version).
        nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
        nbr.rxmt_lsupd_start_check(iface, area, instance);
        rxmt_added = true;
    }

    // 2) Nobody on this interface needs the LSA.
    if !rxmt_added {
        return false;
    }

    let mut flooded_back = false;
    if let Some((src_iface_idx, src_nbr_idx)) = src
        && src_iface_idx == iface_idx
    {
        // 3) If the LSA was received from the DR or the BDR, chances are that
        // all the neighbors on this interface have received it already.
        let src_rid = neighbors[src_nbr_idx].router_id;
        if iface.state.dr == Some(src_rid) || iface.state.bdr == Some(src_rid)
        {
            return false;
        }

        // 4) The BDR leaves flooding back to the DR.
        if iface.state.ism_state == ism::State::Backup {
            return false;
        }

        flooded_back = true;
    }

    // 5) Flood the LSA out the interface. Transmission is deferred so that
    // more LSAs can be grouped into the same LS Update.
    iface.enqueue_ls_update(area, instance, lsa.clone());

    flooded_back
}
