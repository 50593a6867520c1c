//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::Utc;

use crate::area::Area;
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, InterfaceIndex, LsaEntryId,
    LsdbId, LsdbIndex, NeighborId, NeighborIndex, lsdb_get, lsdb_index,
};
use crate::debug::{Debug, LsaFlushReason, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, ism};
use crate::lsdb::{self, LsaEntry, LsaEntryFlags, LsaOriginateEvent};
use crate::neighbor::{LastDbDesc, Neighbor, nsm};
use crate::packet::lsa::{Lsa, LsaBody, LsaScope};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Packet,
    PacketType,
};
use crate::tasks::NbrTimer;
use crate::{origination, output, tasks};

// ===== Interface FSM event =====

pub(crate) fn process_ism_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    event: ism::Event,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    // Invoke FSM event.
    iface.fsm(
        area,
        instance,
        &mut arenas.neighbors,
        &arenas.lsa_entries,
        event,
    );

    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    event: nsm::Event,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (nbr_idx, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    // Invoke FSM event.
    nbr.fsm(iface, area, instance, &arenas.lsa_entries, event);
    if nbr.state == nsm::State::Down {
        // Effectively delete the neighbor.
        iface.state.neighbors.delete(&mut arenas.neighbors, nbr_idx);

        // Synchronize interface's Hello Tx (updated list of neighbors).
        iface.sync_hello_tx(area, instance, &arenas.neighbors);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    packet: Packet,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (area_idx, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (iface_idx, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    // Ignore packets received on inoperational or passive interfaces.
    if iface.is_down() || iface.is_passive() {
        return Ok(());
    }

    // Validate IP destination and source addresses.
    iface.validate_packet_dst(dst)?;
    iface.validate_packet_src(src)?;

    // Check for Area ID mismatch.
    let hdr = packet.hdr();
    let pkt_type = hdr.pkt_type;
    if hdr.area_id != area.area_id {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            pkt_type,
            InterfaceCfgError::AreaIdMismatch(hdr.area_id, area.area_id),
        ));
    }

    // Instance ID mismatches are expected in normal operation (multiple
    // instances can share the same link) and do not constitute an error.
    if hdr.instance_id != instance.config.instance_id {
        return Ok(());
    }

    // Log received packet.
    if instance.config.trace_opts.packets.rx {
        Debug::PacketRx(&iface.name, &src, &dst, &packet).log();
    }

    // OSPFv3 neighbors are always identified by their Router IDs.
    let router_id = hdr.router_id;
    if let Packet::Hello(pkt) = packet {
        process_packet_hello(
            iface,
            area,
            instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            src,
            pkt,
        )
    } else {
        // Non-Hello packets not matching any active neighbor are discarded.
        let (nbr_idx, nbr) = iface
            .state
            .neighbors
            .get_mut_by_router_id(&mut arenas.neighbors, router_id)
            .ok_or(Error::UnknownNeighbor(src, router_id))?;

        match packet {
            Packet::Hello(_) => Ok(()),
            Packet::DbDesc(pkt) => process_packet_dbdesc(
                nbr,
                iface,
                area,
                instance,
                &arenas.lsa_entries,
                src,
                pkt,
            ),
            Packet::LsRequest(pkt) => process_packet_lsreq(
                nbr,
                iface,
                area,
                instance,
                &arenas.lsa_entries,
                pkt,
            ),
            Packet::LsUpdate(pkt) => process_packet_lsupd(
                nbr_idx, iface_idx, area_idx, instance, arenas, pkt,
            ),
            Packet::LsAck(pkt) => {
                process_packet_lsack(nbr, iface, area, instance, pkt)
            }
        }
    }
}

fn process_packet_hello(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv6Addr,
    hello: Hello,
) -> Result<(), Error> {
    // Perform all the required sanity checks.
    iface.validate_hello(area, instance, &hello).map_err(|error| {
        Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::Hello,
            error,
        )
    })?;

    // Find or create new neighbor.
    let router_id = hello.hdr.router_id;
    let nbr_idx = match iface
        .state
        .neighbors
        .get_by_router_id(neighbors, router_id)
    {
        Some((nbr_idx, _)) => nbr_idx,
        None => {
            // Create new neighbor.
            let (nbr_idx, nbr) =
                iface.state.neighbors.insert(neighbors, router_id, src);

            // Initialize neighbor values.
            nbr.iface_id = Some(hello.iface_id);
            nbr.priority = hello.priority;
            if iface.is_broadcast_or_nbma() {
                nbr.dr = hello.dr;
                nbr.bdr = hello.bdr;
            }

            // Synchronize interface's Hello Tx (updated list of neighbors).
            iface.sync_hello_tx(area, instance, neighbors);

            nbr_idx
        }
    };
    let nbr = &mut neighbors[nbr_idx];

    // Update neighbor's source address (link-local addresses may change).
    nbr.src = src;

    // Trigger the HelloReceived event.
    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::HelloRcvd);

    // Trigger the 1-WayReceived or the 2-WayReceived event.
    if hello.neighbors.contains(&instance.state.router_id) {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::TwoWayRcvd);
    } else {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::OneWayRcvd);

        // Update neighbor values.
        nbr.iface_id = Some(hello.iface_id);
        if iface.is_broadcast_or_nbma() {
            nbr.priority = hello.priority;
            nbr.dr = hello.dr;
            nbr.bdr = hello.bdr;
        }

        return Ok(());
    }

    // Check for Interface ID change.
    if nbr.iface_id != Some(hello.iface_id) {
        nbr.iface_id = Some(hello.iface_id);

        // (Re)originate LSAs that might have been affected.
        instance.tx.lsa_orig_event(
            LsaOriginateEvent::NeighborInterfaceIdChange {
                area_id: area.id,
                iface_id: iface.id,
            },
        );
    }

    // Examine rest of the Hello Packet (ignore Point-to-MultiPoint interfaces
    // as per errata 4022 of RFC 2328).
    if iface.is_broadcast_or_nbma() {
        // Check for Router Priority change.
        if hello.priority != nbr.priority {
            nbr.priority = hello.priority;
            instance
                .tx
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Check for DR/BDR changes.
        let nbr_rid = nbr.router_id;
        if iface.state.ism_state == ism::State::Waiting
            && ((hello.dr == Some(nbr_rid) && hello.bdr.is_none())
                || hello.bdr == Some(nbr_rid))
        {
            instance
                .tx
                .ism_event(area.id, iface.id, ism::Event::BackupSeen);
        }
        if (hello.dr == Some(nbr_rid)) != (nbr.dr == Some(nbr_rid))
            || (hello.bdr == Some(nbr_rid)) != (nbr.bdr == Some(nbr_rid))
        {
            instance
                .tx
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Update neighbor's DR/BDR.
        nbr.dr = hello.dr;
        nbr.bdr = hello.bdr;
    }

    Ok(())
}

fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv6Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    // MTU mismatch check.
    if !iface.config.mtu_ignore
        && iface.system.mtu.is_some_and(|mtu| dbdesc.mtu > mtu)
    {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::DbDesc,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    // Further processing depends on the neighbor's state.
    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                let event = nsm::Event::TwoWayRcvd;
                nbr.fsm(iface, area, instance, lsa_entries, event);
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
                // Fall through to the ExStart case.
            }

            let router_id = instance.state.router_id;
            if dbdesc
                .dd_flags
                .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
                && dbdesc.lsa_hdrs.is_empty()
                && dbdesc.hdr.router_id > router_id
            {
                // Set the master/slave bit to slave, and set the neighbor data
                // structure's DD sequence number to that specified by the
                // master.
                nbr.dd_flags.remove(DbDescFlags::MS);
                nbr.dd_seq_no = dbdesc.dd_seq_no;
            } else if !dbdesc
                .dd_flags
                .intersects(DbDescFlags::I | DbDescFlags::MS)
                && dbdesc.dd_seq_no == nbr.dd_seq_no
                && dbdesc.hdr.router_id < router_id
            {
                // In this case the router is Master.
            } else {
                // Ignore the packet.
                return Ok(());
            }

            nbr.options = Some(dbdesc.options);
            let event = nsm::Event::NegotiationDone;
            nbr.fsm(iface, area, instance, lsa_entries, event);
        }
        nsm::State::Exchange => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(&dbdesc) {
                // The slave needs to retransmit the last Database Description
                // packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }

                return Ok(());
            }

            // Sanity checks.
            let reason = match &nbr.last_rcvd_dbdesc {
                Some(last_rcvd_dbdesc)
                    if dbdesc.dd_flags.contains(DbDescFlags::I)
                        || dbdesc.dd_flags.contains(DbDescFlags::MS)
                            != last_rcvd_dbdesc
                                .dd_flags
                                .contains(DbDescFlags::MS) =>
                {
                    Some(SeqNoMismatchReason::InconsistentFlags)
                }
                Some(last_rcvd_dbdesc)
                    if dbdesc.options != last_rcvd_dbdesc.options =>
                {
                    Some(SeqNoMismatchReason::InconsistentOptions)
                }
                _ if (nbr.dd_flags.contains(DbDescFlags::MS)
                    && dbdesc.dd_seq_no != nbr.dd_seq_no)
                    || (!nbr.dd_flags.contains(DbDescFlags::MS)
                        && dbdesc.dd_seq_no != nbr.dd_seq_no.wrapping_add(1)) =>
                {
                    Some(SeqNoMismatchReason::InconsistentSeqNo)
                }
                _ => None,
            };
            if let Some(reason) = reason {
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(iface, area, instance, lsa_entries, event);
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(&dbdesc) {
                // The slave must respond to duplicates by repeating the last
                // Database Description packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }

                return Ok(());
            }

            let reason = SeqNoMismatchReason::UnexpectedDbDesc;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, area, instance, lsa_entries, event);
            return Ok(());
        }
    }

    // If we got this far it means the packet was accepted. Stop the
    // retransmission interval in case it's active.
    nbr.rxmt_dbdesc_stop(iface, area, instance);

    // Now iterate over all LSA headers.
    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Check if the LSA is valid for this area.
        if !lsdb::lsa_type_is_valid(
            Some(area.config.area_type),
            lsa_hdr.lsa_type,
        ) {
            let reason = SeqNoMismatchReason::InvalidLsaType;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, area, instance, lsa_entries, event);
            return Ok(());
        }

        // RFC 5243 says:
        // "If the Database summary list contains an instance of the LSA that is
        // the same as or less recent than the listed LSA, the LSA is removed
        // from the Database summary list".
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) =
            nbr.lists.db_summary.entry(lsa_key)
        {
            let db_summ_lsa = o.get();
            if lsdb::lsa_compare(&db_summ_lsa.hdr, lsa_hdr) != Ordering::Greater
            {
                o.remove();
            }
        }

        // Put the LSA on the Link state request list if it's not present on the
        // LSDB, or if the local copy is less recent than the received one.
        if let Some(lse) = lsdb::find_scoped(
            &lsa_key,
            iface,
            area,
            &instance.state.lsdb,
            lsa_entries,
        ) && lsdb::lsa_compare(&lse.data.hdr, lsa_hdr) != Ordering::Less
        {
            continue;
        }
        nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
    }

    // Start sending Link State Request packets.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, area, instance);
    }

    // Further processing depends on whether the router is master or slave.
    let mut exchange_done = false;
    if nbr.dd_flags.contains(DbDescFlags::MS) {
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        } else {
            output::send_dbdesc(nbr, iface, area, instance, lsa_entries);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;

        output::send_dbdesc(nbr, iface, area, instance, lsa_entries);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        }
    }

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });

    if exchange_done {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::ExchangeDone);

        // The slave must wait RouterDeadInterval seconds before freeing the
        // last Database Description packet. Reception of a Database
        // Description packet from the master after this interval will generate
        // a SeqNumberMismatch neighbor event.
        if !nbr.dd_flags.contains(DbDescFlags::MS) {
            nbr.dbdesc_free_timer_start(iface, area, instance);
        }
    }

    Ok(())
}

fn process_packet_lsreq(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    ls_req: LsRequest,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all request entries.
    for lsa_key in &ls_req.entries {
        // Locate LSA in the LSDB. Requests for LSAs of unknown scope are
        // ignored.
        if lsa_key.lsa_type.scope() == LsaScope::Unknown {
            continue;
        }
        match lsdb::find_scoped(
            lsa_key,
            iface,
            area,
            &instance.state.lsdb,
            lsa_entries,
        ) {
            Some(lse) => {
                // Copy LSA for transmission to the neighbor.
                let lsa = lse.data.clone();
                nbr.lists.ls_update.insert(*lsa_key, lsa);
            }
            None => {
                // Something has gone wrong with the Database Exchange process.
                let event = nsm::Event::BadLsReq;
                nbr.fsm(iface, area, instance, lsa_entries, event);
                return Ok(());
            }
        }
    }

    // Schedule transmission of new LS Update.
    if !nbr.lists.ls_update.is_empty() {
        instance.tx.send_lsupd(area.id, iface.id, Some(nbr.id));
    }

    Ok(())
}

fn process_packet_lsupd(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    let nbr = &arenas.neighbors[nbr_idx];
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Process all LSAs contained in the packet.
    for lsa in ls_upd.lsas {
        let stop = process_packet_lsupd_lsa(
            nbr_idx, iface_idx, area_idx, instance, arenas, lsa,
        );
        if stop {
            break;
        }
    }

    Ok(())
}

// Processes a single LSA received in an LS Update (RFC 2328 - Section 13).
//
// Returns whether the processing of the remaining LSAs of the packet should
// stop.
fn process_packet_lsupd_lsa(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsa: Lsa,
) -> bool {
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];

    // (1) Validate the LSA (not only the checksum as specified by the RFC).
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(nbr.router_id, &lsa.hdr, &error).log();

        // Examine the next LSA.
        return false;
    }

    // (2-3) Check if the LSA type is valid for this area.
    if !lsdb::lsa_type_is_valid(Some(area.config.area_type), lsa.hdr.lsa_type)
    {
        // Examine the next LSA.
        return false;
    }

    // (5) Find the instance of this LSA that is currently contained in the
    // router's link state database.
    let Some(lsdb_idx) =
        lsdb::lsdb_idx_by_lsa_type(area_idx, iface_idx, lsa.hdr.lsa_type)
    else {
        Error::LsaReservedScope(lsa.hdr.lsa_type).log();
        return false;
    };
    let lsdb = match lsdb_idx {
        LsdbIndex::Link(_, _) => &iface.state.lsdb,
        LsdbIndex::Area(_) => &area.state.lsdb,
        LsdbIndex::As => &instance.state.lsdb,
    };
    let lsa_key = lsa.hdr.key();
    let lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);

    // (4) If the LSA's LS age is equal to MaxAge, and there is currently no
    // instance of the LSA in the router's link state database, and none of
    // router's neighbors are in states Exchange or Loading.
    if lsa.hdr.is_maxage()
        && lse.is_none()
        && !arenas.neighbors.iter().any(|(_, nbr)| {
            matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
        })
    {
        // Acknowledge the receipt of the LSA.
        output::send_lsack_direct(nbr, iface, area, instance, &lsa.hdr);

        // Examine the next LSA.
        return false;
    }

    // (5 cont.) There is no database copy, or the received LSA is more
    // recent than the database copy.
    let lsa_cmp = lse.map(|lse| lsdb::lsa_compare(&lse.data.hdr, &lsa.hdr));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // (5.a) MinLSArrival check.
        if let Some(lse) = lse
            && lsdb::lsa_min_arrival_check(lse, instance.state.clock)
        {
            Debug::LsaMinArrivalDiscard(nbr.router_id, &lsa.hdr).log();

            // Examine the next LSA.
            return false;
        }

        // Move LSA into a reference-counting pointer.
        let lsa = Arc::new(lsa);

        // (5.b) Immediately flood the new LSA out some subset of the
        // router's interfaces.
        let src = Some((iface_idx, nbr_idx));
        let flooded_back = flood(
            instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_idx,
            &lsa,
            src,
        );

        // (5.c) This step can be skipped since the LSA installation process
        // already takes care of removing the old copy from all Link state
        // retransmission lists.

        // (5.d) Install the new LSA in the link state database (replacing
        // the current database copy).
        let (lse_idx, _) = lsdb::install(instance, arenas, lsdb_idx, lsa);
        let lse = &mut arenas.lsa_entries[lse_idx];
        lse.flags.insert(LsaEntryFlags::RECEIVED);

        // Update statistics.
        instance.state.rx_lsa_count += 1;
        instance.state.discontinuity_time = Utc::now();

        // (5.e) Possibly acknowledge the receipt of the LSA by sending a
        // Link State Acknowledgment packet.
        let lse = &arenas.lsa_entries[lse_idx];
        let nbr = &arenas.neighbors[nbr_idx];
        let iface = &mut arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        let nbr_router_id = nbr.router_id;
        if !flooded_back
            && (iface.state.ism_state != ism::State::Backup
                || iface.state.dr == Some(nbr_router_id))
        {
            // Enqueue delayed ack.
            iface.enqueue_delayed_ack(area, instance, &lse.data.hdr);
        }

        // (5.f) Check if this is a self-originated LSA.
        if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
            Debug::LsaSelfOriginated(nbr_router_id, &lse.data.hdr).log();

            // (Re)originate or flush self-originated LSA.
            let (lsdb_id, _) = lsdb_index(
                &instance.state.lsdb,
                &arenas.areas,
                &arenas.interfaces,
                lsdb_idx,
            );
            instance.tx.lsa_orig_event(
                LsaOriginateEvent::SelfOriginatedLsaRcvd {
                    lsdb_id,
                    lse_id: lse.id,
                },
            );
        }

        // Examine the next LSA.
        return false;
    }

    // Reaching this point means a database copy exists.
    let Some(lse) = lse else {
        return false;
    };
    let nbr = &mut arenas.neighbors[nbr_idx];

    // (6 - errata 3974) Check if the received LSA is the same instance as
    // the database copy (i.e., neither one is more recent).
    if lsa_cmp == Some(Ordering::Equal) {
        // Check if this LSA can be handled as an implied acknowledgment.
        if nbr.lists.ls_rxmt.remove(&lsa_key).is_some() {
            nbr.rxmt_lsupd_stop_check(iface, area, instance);

            if iface.state.ism_state == ism::State::Backup
                && iface.state.dr == Some(nbr.router_id)
            {
                // Enqueue delayed ack.
                iface.enqueue_delayed_ack(area, instance, &lsa.hdr);
            }
        } else {
            // Send direct ack.
            output::send_lsack_direct(nbr, iface, area, instance, &lsa.hdr);
        }

        // Examine the next LSA.
        return false;
    }

    // (7 - errata 3974) If there is an instance of the LSA on the sending
    // neighbor's Link state request list, an error has occurred in the
    // Database Exchange process.
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        // Restart the Database Exchange process.
        nbr.fsm(
            iface,
            area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::BadLsReq,
        );

        // Stop processing the Link State Update packet.
        return true;
    }

    // (8) The database copy is more recent.
    //
    // If the database copy has LS age equal to MaxAge and LS sequence
    // number equal to MaxSequenceNumber, simply discard the received LSA
    // without acknowledging it.
    if lse.data.hdr.is_maxage() && lse.data.hdr.seq_no == lsdb::LSA_MAX_SEQ_NO
    {
        // Examine the next LSA.
        return false;
    }
    if !lsdb::lsa_min_arrival_check(lse, instance.state.clock) {
        // Send the database copy back to the sending neighbor, encapsulated
        // within a Link State Update Packet.
        nbr.lists.ls_update.insert(lsa_key, lse.data.clone());
        instance.tx.send_lsupd(area.id, iface.id, Some(nbr.id));
    } else {
        Debug::LsaMinArrivalDiscard(nbr.router_id, &lsa.hdr).log();
    }

    // Examine the next LSA.
    false
}

fn process_packet_lsack(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    ls_ack: LsAck,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all LSA headers.
    for lsa_hdr in &ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            let lsa = o.get();
            if lsdb::lsa_compare(&lsa.hdr, lsa_hdr) == Ordering::Equal {
                o.remove();
                nbr.rxmt_lsupd_stop_check(iface, area, instance);
            } else {
                Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
            }
        }
    }

    Ok(())
}

// ===== Free last sent/received Database Description packets =====

pub(crate) fn process_dbdesc_free(
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    // Free last sent/received Database Description packets.
    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;

    Ok(())
}

// ===== Request to send LS Update =====

pub(crate) fn process_send_lsupd(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: Option<NeighborId>,
) -> Result<(), Error> {
    // Lookup area, interface and optional neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let nbr_idx = match nbr_id {
        Some(nbr_id) => {
            let (nbr_idx, _) = iface
                .state
                .neighbors
                .get_by_id(&arenas.neighbors, nbr_id)?;
            Some(nbr_idx)
        }
        None => None,
    };

    // Send LS Update.
    output::send_lsupd(nbr_idx, iface, area, instance, &mut arenas.neighbors);

    Ok(())
}

// ===== Neighbor timers =====

pub(crate) fn process_nbr_timer(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    timer: NbrTimer,
) -> Result<(), Error> {
    match timer {
        NbrTimer::Inactivity => process_nsm_event(
            instance,
            arenas,
            area_id,
            iface_id,
            nbr_id,
            nsm::Event::InactivityTimer,
        ),
        NbrTimer::DbDescFree => {
            process_dbdesc_free(arenas, area_id, iface_id, nbr_id)
        }
        NbrTimer::DbDescRxmt
        | NbrTimer::LsRequestRxmt
        | NbrTimer::LsUpdateRxmt => process_packet_rxmt(
            instance, arenas, area_id, iface_id, nbr_id, timer,
        ),
    }
}

// ===== Packet retransmission =====

pub(crate) fn process_packet_rxmt(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    timer: NbrTimer,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    // Ignore stale expirations.
    if !nbr.rxmt_active(timer) {
        return Ok(());
    }

    // Retransmit packet.
    match timer {
        NbrTimer::DbDescRxmt => {
            output::rxmt_dbdesc(nbr, iface, instance);
        }
        NbrTimer::LsRequestRxmt => {
            output::rxmt_lsreq(nbr, iface, area, instance);
        }
        NbrTimer::LsUpdateRxmt => {
            let lsa_entries = &arenas.lsa_entries;
            output::rxmt_lsupd(nbr, iface, area, instance, lsa_entries);
        }
        NbrTimer::Inactivity | NbrTimer::DbDescFree => return Ok(()),
    }

    // Rearm the retransmission interval.
    nbr.rxmt_timer_start(iface, area, instance, timer);

    Ok(())
}

// ===== Interface timers =====

pub(crate) fn process_hello_interval(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

    // Send Hello and schedule the next one.
    if !iface.is_down() && !iface.is_passive() {
        iface.hello_interval_start(area, instance, &arenas.neighbors);
    }

    Ok(())
}

pub(crate) fn process_wait_timer(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
) -> Result<(), Error> {
    let event = ism::Event::WaitTimer;
    process_ism_event(instance, arenas, area_id, iface_id, event)
}

pub(crate) fn process_nbma_poll(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    addr: Ipv6Addr,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

    // Poll the static neighbor, provided it's still configured.
    if !iface.is_down()
        && let Some(snbr) =
            iface.config.static_nbrs.iter().find(|snbr| snbr.addr == addr)
    {
        iface.nbma_poll_start(
            area,
            instance,
            &arenas.neighbors,
            addr,
            snbr.poll_interval,
        );
    }

    Ok(())
}

// ===== Delayed Ack timeout =====

pub(crate) fn process_delayed_ack_timeout(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    // Send delayed LS Ack.
    output::send_lsack_delayed(iface, area, instance, &arenas.neighbors);

    Ok(())
}

// ===== LSA origination event =====

pub(crate) fn process_lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    origination::lsa_orig_event(instance, arenas, event)
}

// ===== LSA origination check =====

pub(crate) fn process_lsa_orig_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) -> Result<(), Error> {
    // Lookup LSDB.
    let (lsdb_idx, _) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;

    // Check if the LSA should be originated.
    lsdb::originate_check(instance, arenas, lsdb_idx, lsa_id, lsa_body);

    Ok(())
}

// ===== LSA flush event =====

pub(crate) fn process_lsa_flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    reason: LsaFlushReason,
) -> Result<(), Error> {
    // Lookup LSDB and LSA entry.
    let (lsdb_idx, lsdb) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;
    let (lse_idx, _) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;

    // Flush LSA.
    lsdb::flush(instance, arenas, lsdb_idx, lse_idx, reason);

    Ok(())
}

// ===== LSDB age tick =====

pub(crate) fn process_age_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    lsdb::age_tick(instance, arenas);

    // Schedule the next tick.
    tasks::age_tick_timer(instance.sb);
}
