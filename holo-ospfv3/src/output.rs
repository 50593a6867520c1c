//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::area::Area;
use crate::collections::{Arena, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{self, LsaEntry};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{
    ALL_DR_RTRS, ALL_SPF_RTRS, DbDesc, DbDescFlags, LsAck, LsRequest,
    LsUpdate, Packet, PacketHdr, PacketType,
};
use crate::tasks::messages::output::NetTxPacketMsg;

// Destination addresses of an outgoing packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SendDestination {
    pub addrs: SmallVec<[Ipv6Addr; 4]>,
}

// ===== impl SendDestination =====

impl SendDestination {
    pub(crate) fn new(addrs: SmallVec<[Ipv6Addr; 4]>) -> Self {
        SendDestination { addrs }
    }
}

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                let lsa =
                    lsa_db_copy(&lsa, iface, area, instance, lsa_entries);
                total += LsaHdr::LENGTH;
                lsa_hdrs.push(lsa.hdr);
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I) && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let packet = Packet::DbDesc(DbDesc {
        hdr: packet_hdr(PacketType::DbDesc, area, instance),
        options: area.options(),
        mtu: iface.system.mtu.unwrap_or_default(),
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    let msg = NetTxPacketMsg { packet, dst };
    nbr.last_sent_dbdesc = Some(msg.clone());
    iface.send_packet(instance, msg);

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, area, instance);
    }
}

pub(crate) fn rxmt_dbdesc(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    if let Some(msg) = &nbr.last_sent_dbdesc {
        iface.send_packet(instance, msg.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size().saturating_sub(LsRequest::BASE_LENGTH);

    // Append as many LS Request Entries as possible in a single packet.
    let mut total = 0;
    while total + LsRequest::ENTRY_LENGTH <= max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
            }
            None => break,
        }
    }

    rxmt_lsreq(nbr, iface, area, instance);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(iface, area, instance);
}

pub(crate) fn rxmt_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Request packet.
    let packet = Packet::LsRequest(LsRequest {
        hdr: packet_hdr(PacketType::LsRequest, area, instance),
        entries: nbr.lists.ls_request_pending.keys().copied().collect(),
    });

    // Enqueue packet for network transmission.
    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(instance, msg);
}

// ===== LS Update Packets =====

// Sends the LSAs enqueued for transmission, either on the interface flooding
// list or on the given neighbor's list.
pub(crate) fn send_lsupd(
    nbr_idx: Option<NeighborIndex>,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
) {
    // Get list of LSAs enqueued for transmission.
    let (dst, ls_update_list) = match nbr_idx {
        Some(nbr_idx) => {
            let nbr = &mut neighbors[nbr_idx];
            let dst = send_dest_nbr(nbr, iface);
            (dst, std::mem::take(&mut nbr.lists.ls_update))
        }
        None => {
            let dst = send_dest_iface(iface, neighbors);
            (dst, std::mem::take(&mut iface.state.ls_update_list))
        }
    };
    if dst.addrs.is_empty() {
        return;
    }

    // Send as many LS Updates as necessary.
    let lsas = ls_update_list.into_values().collect::<Vec<_>>();
    send_lsupd_packets(
        iface,
        area,
        instance,
        &dst,
        lsas.iter().map(|lsa| lsa.as_ref()),
    );
}

pub(crate) fn rxmt_lsupd(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size().saturating_sub(LsUpdate::BASE_LENGTH);

    // Append as many LSAs as possible in a single packet.
    let mut total = 0;
    let mut lsas = vec![];
    for lsa in nbr.lists.ls_rxmt.values_mut() {
        // Pick up the current age of the LSDB copy.
        *lsa = lsa_db_copy(lsa, iface, area, instance, lsa_entries);

        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        if !lsas.is_empty() && total + lsa.hdr.length > max_size {
            break;
        }
        total += lsa.hdr.length;
        lsas.push(lsa_aged_for_tx(lsa, iface));
    }

    let packet = Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate, area, instance),
        lsas,
    });
    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(instance, msg);
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_hdr: &LsaHdr,
) {
    let dst = send_dest_nbr(nbr, iface);

    let packet = Packet::LsAck(LsAck {
        hdr: packet_hdr(PacketType::LsAck, area, instance),
        lsa_hdrs: vec![*lsa_hdr],
    });
    let msg = NetTxPacketMsg { packet, dst };
    iface.send_packet(instance, msg);
}

pub(crate) fn send_lsack_delayed(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &Arena<Neighbor>,
) {
    let dst = send_dest_iface(iface, neighbors);

    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(LsAck::BASE_LENGTH);

    // Send as many LS Acks as necessary.
    while !iface.state.ls_ack_list.is_empty() {
        // Append as many LSA headers as possible in a single packet.
        let mut total = 0;
        let mut lsa_hdrs = vec![];
        while total + LsaHdr::LENGTH <= max_size {
            match iface.state.ls_ack_list.pop_first() {
                Some((_, lsa_hdr)) => {
                    total += LsaHdr::LENGTH;
                    lsa_hdrs.push(lsa_hdr);
                }
                None => break,
            }
        }

        let packet = Packet::LsAck(LsAck {
            hdr: packet_hdr(PacketType::LsAck, area, instance),
            lsa_hdrs,
        });
        let msg = NetTxPacketMsg {
            packet,
            dst: dst.clone(),
        };
        iface.send_packet(instance, msg);
    }
}

// ===== helper functions =====

fn packet_hdr(
    pkt_type: PacketType,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> PacketHdr {
    PacketHdr::new(
        pkt_type,
        instance.state.router_id,
        area.area_id,
        instance.config.instance_id,
    )
}

// Splits the given LSAs in as many LS Update packets as necessary.
fn send_lsupd_packets<'a>(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dst: &SendDestination,
    lsas: impl Iterator<Item = &'a Lsa>,
) {
    // Calculate maximum packet size.
    let max_size =
        iface.max_packet_size().saturating_sub(LsUpdate::BASE_LENGTH);

    let mut total = 0;
    let mut pending = vec![];
    for lsa in lsas {
        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        if !pending.is_empty() && total + lsa.hdr.length > max_size {
            let lsas = std::mem::take(&mut pending);
            send_lsupd_packet(iface, area, instance, dst, lsas);
            total = 0;
        }
        total += lsa.hdr.length;
        pending.push(lsa_aged_for_tx(lsa, iface));
    }
    if !pending.is_empty() {
        send_lsupd_packet(iface, area, instance, dst, pending);
    }
}

fn send_lsupd_packet(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dst: &SendDestination,
    lsas: Vec<Lsa>,
) {
    let packet = Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate, area, instance),
        lsas,
    });
    let msg = NetTxPacketMsg {
        packet,
        dst: dst.clone(),
    };
    iface.send_packet(instance, msg);
}

// Returns the LSDB copy of the given LSA if it's still the same instance.
//
// Copies kept in the neighbor lists aren't aged, so the LSDB copy must be
// used whenever the LSA header goes out on the wire.
fn lsa_db_copy(
    lsa: &Arc<Lsa>,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) -> Arc<Lsa> {
    let key = lsa.hdr.key();
    match lsdb::find_scoped(
        &key,
        iface,
        area,
        &instance.state.lsdb,
        lsa_entries,
    ) {
        Some(lse)
            if lse.data.hdr.seq_no == lsa.hdr.seq_no
                && lse.data.hdr.cksum == lsa.hdr.cksum
                && lse.data.hdr.age >= lsa.hdr.age =>
        {
            lse.data.clone()
        }
        _ => lsa.clone(),
    }
}

// Returns a copy of the LSA with its age incremented by InfTransDelay.
fn lsa_aged_for_tx(lsa: &Lsa, iface: &Interface) -> Lsa {
    let mut lsa = lsa.clone();
    let age = std::cmp::min(
        lsa.hdr.age.saturating_add(iface.config.transmit_delay),
        lsdb::LSA_MAX_AGE,
    );
    lsa.set_age(age);
    lsa
}

// Returns destination used to send a packet directly to the given neighbor.
fn send_dest_nbr(nbr: &Neighbor, iface: &Interface) -> SendDestination {
    let addr = if iface.config.if_type == InterfaceType::PointToPoint {
        ALL_SPF_RTRS
    } else {
        nbr.src
    };
    SendDestination::new(smallvec![addr])
}

// Returns a destination used to send a packet to all adjacent neighbors
// associated with the given interface.
fn send_dest_iface(
    iface: &Interface,
    neighbors: &Arena<Neighbor>,
) -> SendDestination {
    let addrs = match iface.config.if_type {
        InterfaceType::Broadcast => {
            let addr = if matches!(
                iface.state.ism_state,
                ism::State::Dr | ism::State::Backup
            ) {
                ALL_SPF_RTRS
            } else {
                ALL_DR_RTRS
            };
            smallvec![addr]
        }
        InterfaceType::NonBroadcast
        | InterfaceType::PointToMultipoint
        | InterfaceType::Virtual => {
            // On non-broadcast networks, separate LS Update and delayed LS Ack
            // packets must be sent, as unicasts, to each adjacent neighbor.
            iface
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
        InterfaceType::PointToPoint => smallvec![ALL_SPF_RTRS],
    };
    SendDestination::new(addrs)
}
