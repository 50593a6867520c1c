//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use holo_utils::ip::Ipv6AddrExt;
use ipnetwork::Ipv6Network;
use ism::{Event, State};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::area::{Area, AreaType};
use crate::collections::{Arena, InterfaceId, Lsdb, Neighbors};
use crate::configuration::InterfaceCfg;
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, InterfaceCfgError};
use crate::instance::InstanceUpView;
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, nsm};
use crate::output::SendDestination;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{
    ALL_DR_RTRS, ALL_SPF_RTRS, Hello, Options, Packet, PacketHdr, PacketType,
};
use crate::tasks;
use crate::tasks::IfaceTimer;
use crate::tasks::messages::output::NetTxPacketMsg;

// Minimum IPv6 link MTU.
const IPV6_MIN_MTU: u16 = 1280;
const IPV6_HDR_SIZE: u16 = 40;

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub system: InterfaceSys,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

#[derive(Debug, Default)]
pub struct InterfaceSys {
    // Operational status.
    pub operative: bool,
    pub loopback: bool,
    // Interface ifindex (also used as the OSPFv3 Interface ID).
    pub ifindex: Option<u32>,
    // Interface MTU.
    pub mtu: Option<u16>,
    // Global and unique-local prefixes configured on this interface.
    pub addr_list: BTreeSet<Ipv6Network>,
    // Link-local address, used as the source of all OSPFv3 packets.
    pub linklocal_addr: Option<Ipv6Addr>,
}

#[derive(Debug)]
pub struct InterfaceState {
    // ISM state.
    pub ism_state: State,
    // The network DR/BDR, identified by their Router IDs.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // List of neighbors attached to this interface.
    pub neighbors: Neighbors,
    // List of LSAs enqueued for transmission.
    pub ls_update_list: BTreeMap<LsaKey, Arc<Lsa>>,
    // List of pending delayed Acks.
    pub ls_ack_list: BTreeMap<LsaKey, LsaHdr>,
    // Statistics.
    pub event_count: u32,
    pub discontinuity_time: DateTime<Utc>,
    // LSDB of link-scope LSAs.
    pub lsdb: Lsdb,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    PointToPoint,
    #[default]
    Broadcast,
    NonBroadcast,
    PointToMultipoint,
    Virtual,
}

#[derive(Clone, Copy, Debug)]
struct DrCandidate {
    router_id: Ipv4Addr,
    dr: Option<Ipv4Addr>,
    bdr: Option<Ipv4Addr>,
    priority: u8,
}

// Interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        id: InterfaceId,
        name: String,
        config: InterfaceCfg,
    ) -> Interface {
        Debug::InterfaceCreate(&name).log();

        Interface {
            id,
            name,
            system: InterfaceSys::default(),
            config,
            state: InterfaceState::default(),
        }
    }

    // Checks if the interface needs to be started or stopped in response to a
    // configuration or address table change.
    pub(crate) fn update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        // Check next ISM event to invoke, but only if necessary.
        let event = match self.is_ready() {
            Ok(_) => {
                let ism_state = self.state.ism_state;
                if self.system.loopback {
                    if ism_state == State::Loopback {
                        return;
                    }
                    Event::LoopInd
                } else if ism_state == State::Loopback {
                    Event::UnloopInd
                } else if ism_state == State::Down {
                    Event::InterfaceUp
                } else {
                    return;
                }
            }
            Err(reason) if !self.is_down() => Event::InterfaceDown(reason),
            _ => return,
        };

        // Invoke ISM event.
        self.fsm(area, instance, neighbors, lsa_entries, event);

        // A looped back interface goes through Down before it can come up.
        if self.state.ism_state == State::Down && self.is_ready().is_ok() {
            let event = Event::InterfaceUp;
            self.fsm(area, instance, neighbors, lsa_entries, event);
        }
    }

    // Returns whether the interface is ready for OSPF operation.
    pub(crate) fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.system.operative {
            return Err(InterfaceInactiveReason::OperationalDown);
        }

        if self.system.ifindex.is_none() {
            return Err(InterfaceInactiveReason::MissingIfindex);
        }

        if self.system.mtu.is_none() {
            return Err(InterfaceInactiveReason::MissingMtu);
        }

        if !self.system.loopback && self.system.linklocal_addr.is_none() {
            return Err(InterfaceInactiveReason::MissingLinkLocalAddress);
        }

        Ok(())
    }

    fn start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        Debug::InterfaceStart(&self.name).log();

        // Get new ISM state.
        let new_ism_state = match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::Virtual => State::PointToPoint,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                if self.config.priority == 0 {
                    State::DrOther
                } else {
                    State::Waiting
                }
            }
        };

        if !self.is_passive() {
            // Start Hello Tx.
            self.hello_interval_start(area, instance, neighbors);

            // Start polling the configured NBMA neighbors that are eligible to
            // become Designated Router.
            if self.config.if_type == InterfaceType::NonBroadcast {
                for snbr in self
                    .config
                    .static_nbrs
                    .iter()
                    .filter(|snbr| snbr.priority != 0)
                {
                    self.nbma_poll_start(
                        area,
                        instance,
                        neighbors,
                        snbr.addr,
                        snbr.poll_interval,
                    );
                }
            }
        }

        if new_ism_state == State::Waiting {
            // Start wait timer.
            tasks::iface_timer_start(
                instance.sb,
                area.id,
                self.id,
                IfaceTimer::Wait,
                self.config.dead_interval,
            );
        }

        new_ism_state
    }

    // Stop interface if it's active.
    fn stop(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        // Kill all neighbors.
        let event = match reason {
            InterfaceInactiveReason::OperationalDown
            | InterfaceInactiveReason::MissingIfindex
            | InterfaceInactiveReason::MissingMtu
            | InterfaceInactiveReason::MissingLinkLocalAddress => {
                nsm::Event::LinkDown
            }
            _ => nsm::Event::Kill,
        };
        for nbr_idx in self.state.neighbors.indexes().collect::<Vec<_>>() {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, lsa_entries, event);
            self.state.neighbors.delete(neighbors, nbr_idx);
        }

        // Cancel all interface timers.
        for timer in
            [IfaceTimer::Hello, IfaceTimer::Wait, IfaceTimer::DelayedAck]
        {
            tasks::iface_timer_stop(instance.sb, area.id, self.id, timer);
        }
        for snbr in &self.config.static_nbrs {
            let addr = snbr.addr;
            tasks::nbma_poll_timer_stop(instance.sb, area.id, self.id, addr);
        }

        // Reset interface state.
        self.state.dr = None;
        self.state.bdr = None;
        self.state.neighbors = Default::default();
        self.state.ls_update_list = Default::default();
        self.state.ls_ack_list = Default::default();
        // NOTE: the interface LSDB should be preserved.
    }

    // Restart Hello Tx (e.g. after the list of neighbors or the DR/BDR
    // changed).
    pub(crate) fn sync_hello_tx(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) {
        if !self.is_passive() && self.state.ism_state >= State::Waiting {
            self.hello_interval_start(area, instance, neighbors);
        }
    }

    pub(crate) fn reset(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        for event in [
            Event::InterfaceDown(InterfaceInactiveReason::Resetting),
            Event::InterfaceUp,
        ] {
            self.fsm(area, instance, neighbors, lsa_entries, event);
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    pub(crate) fn is_passive(&self) -> bool {
        self.system.loopback || self.config.passive
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }

    pub(crate) fn is_broadcast_or_nbma(&self) -> bool {
        matches!(
            self.config.if_type,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast
        )
    }

    pub(crate) fn fsm(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::IsmEvent(&self.state.ism_state, &event).log();

        let new_ism_state = match (self.state.ism_state, &event) {
            (State::Down, Event::InterfaceUp) => {
                // Start interface.
                self.start(area, instance, neighbors)
            }
            (State::Waiting, Event::NbrChange) => {
                // This is an unspecified event but it can happen during normal
                // operation, so ignore it gracefully instead of logging an
                // error.
                return;
            }
            (State::Waiting, Event::BackupSeen | Event::WaitTimer) => {
                tasks::iface_timer_stop(
                    instance.sb,
                    area.id,
                    self.id,
                    IfaceTimer::Wait,
                );

                // Run DR election.
                self.dr_election(area, instance, neighbors)
            }
            (State::DrOther | State::Backup | State::Dr, Event::NbrChange) => {
                // Run DR election.
                self.dr_election(area, instance, neighbors)
            }
            (_, Event::InterfaceDown(reason)) => {
                // Stop interface.
                self.stop(area, instance, neighbors, lsa_entries, *reason);
                State::Down
            }
            (_, Event::LoopInd) => {
                // Stop interface.
                self.stop(
                    area,
                    instance,
                    neighbors,
                    lsa_entries,
                    InterfaceInactiveReason::LoopedBack,
                );
                State::Loopback
            }
            (State::Loopback, Event::UnloopInd) => {
                // No actions are necessary.
                State::Down
            }
            _ => {
                Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
                return;
            }
        };

        // Check for FSM state change.
        if new_ism_state != self.state.ism_state {
            self.fsm_state_change(area, instance, new_ism_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_ism_state: State,
    ) {
        // (Re)originate LSAs that might have been affected.
        instance
            .tx
            .lsa_orig_event(LsaOriginateEvent::InterfaceStateChange {
                area_id: area.id,
                iface_id: self.id,
            });
        if self.state.ism_state == State::Dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                });
        }

        // Effectively transition to the new FSM state.
        Debug::IsmTransition(&self.state.ism_state, &new_ism_state).log();
        self.state.ism_state = new_ism_state;

        // Update statistics.
        self.state.event_count += 1;
        self.state.discontinuity_time = Utc::now();
    }

    // Sends a Hello to all destinations of this interface and schedules the
    // next one.
    pub(crate) fn hello_interval_start(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) {
        let addrs = self.hello_destinations(neighbors);
        if !addrs.is_empty() {
            self.send_hello(area, instance, addrs);
        }

        tasks::iface_timer_start(
            instance.sb,
            area.id,
            self.id,
            IfaceTimer::Hello,
            self.config.hello_interval,
        );
    }

    // Polls a configured NBMA neighbor that isn't up yet.
    pub(crate) fn nbma_poll_start(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
        addr: Ipv6Addr,
        poll_interval: u16,
    ) {
        // Neighbors that are up are reached by the regular Hello Tx.
        if self
            .state
            .neighbors
            .iter(neighbors)
            .any(|nbr| nbr.src == addr)
        {
            return;
        }

        self.send_hello(area, instance, smallvec![addr]);
        tasks::nbma_poll_timer_start(
            instance.sb,
            area.id,
            self.id,
            addr,
            poll_interval,
        );
    }

    pub(crate) fn nbma_poll_stop(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        addr: Ipv6Addr,
    ) {
        tasks::nbma_poll_timer_stop(instance.sb, area.id, self.id, addr);
    }

    fn hello_destinations(
        &self,
        neighbors: &Arena<Neighbor>,
    ) -> SmallVec<[Ipv6Addr; 4]> {
        match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::Broadcast
            | InterfaceType::Virtual => smallvec![ALL_SPF_RTRS],
            InterfaceType::NonBroadcast => {
                // Routers that are neither DR nor BDR only send Hellos to the
                // neighbors that are eligible to become DR. Neighbors that
                // are down are polled instead.
                let dr_or_backup = self.is_dr_or_backup();
                self.config
                    .static_nbrs
                    .iter()
                    .filter(|snbr| snbr.priority != 0 || dr_or_backup)
                    .map(|snbr| snbr.addr)
                    .filter(|addr| {
                        self.state
                            .neighbors
                            .iter(neighbors)
                            .any(|nbr| nbr.src == *addr)
                    })
                    .collect()
            }
            InterfaceType::PointToMultipoint => self
                .config
                .static_nbrs
                .iter()
                .map(|snbr| snbr.addr)
                .collect(),
        }
    }

    fn generate_hello(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> Packet {
        let hdr = PacketHdr::new(
            PacketType::Hello,
            instance.state.router_id,
            area.area_id,
            instance.config.instance_id,
        );

        Packet::Hello(Hello {
            hdr,
            iface_id: self.system.ifindex.unwrap_or_default(),
            priority: self.config.priority,
            options: area.options(),
            hello_interval: self.config.hello_interval,
            dead_interval: self.config.dead_interval,
            dr: self.state.dr,
            bdr: self.state.bdr,
            neighbors: self.state.neighbors.router_ids().collect(),
        })
    }

    pub(crate) fn send_hello(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        addrs: SmallVec<[Ipv6Addr; 4]>,
    ) {
        let packet = self.generate_hello(area, instance);
        let msg = NetTxPacketMsg {
            packet,
            dst: SendDestination::new(addrs),
        };
        self.send_packet(instance, msg);
    }

    fn dr_election(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        let router_id = instance.state.router_id;

        // Step 1: note the current values for the network's Designated Router
        // and Backup Designated Router.
        let old_dr = self.state.dr;
        let old_bdr = self.state.bdr;

        // Steps 2 and 3: calculate the new Backup Designated Router and the new
        // Designated Router.
        let candidates = self
            .dr_eligible_routers(router_id, neighbors)
            .collect::<Vec<_>>();
        let (mut new_dr, mut new_bdr) = dr_bdr_calc(&candidates);
        self.state.dr = new_dr;
        self.state.bdr = new_bdr;

        // Step 4: check if the router is the new DR/BDR or no longer the
        // DR/BDR.
        if (new_dr == Some(router_id) || old_dr == Some(router_id))
            && new_dr != old_dr
            || (new_bdr == Some(router_id) || old_bdr == Some(router_id))
                && new_bdr != old_bdr
        {
            // Repeat steps 2 and 3.
            let candidates = self
                .dr_eligible_routers(router_id, neighbors)
                .collect::<Vec<_>>();
            (new_dr, new_bdr) = dr_bdr_calc(&candidates);
            self.state.dr = new_dr;
            self.state.bdr = new_bdr;
        }

        // Step 5: set the interface state accordingly.
        Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr).log();
        let next_state = if new_dr == Some(router_id) {
            State::Dr
        } else if new_bdr == Some(router_id) {
            State::Backup
        } else {
            State::DrOther
        };

        // Step 6: if the attached network is an NBMA network, and the router
        // itself has just become either DR or BDR, it must start sending Hello
        // Packets to those neighbors that are not eligible to become DR.
        if self.config.if_type == InterfaceType::NonBroadcast
            && matches!(next_state, State::Dr | State::Backup)
        {
            for snbr in self
                .config
                .static_nbrs
                .iter()
                .filter(|snbr| snbr.priority == 0)
            {
                match self
                    .state
                    .neighbors
                    .iter(neighbors)
                    .find(|nbr| nbr.src == snbr.addr)
                {
                    Some(nbr) if nbr.state == nsm::State::Down => {
                        instance.tx.nsm_event(
                            area.id,
                            self.id,
                            nbr.id,
                            nsm::Event::Start,
                        );
                    }
                    Some(_) => (),
                    None => self.nbma_poll_start(
                        area,
                        instance,
                        neighbors,
                        snbr.addr,
                        snbr.poll_interval,
                    ),
                }
            }
        }

        // Step 7: if the DR or BDR changes, invoke the AdjOk? event on all
        // neighbors whose state is at least 2-Way.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr in self
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                instance.tx.nsm_event(
                    area.id,
                    self.id,
                    nbr.id,
                    nsm::Event::AdjOk,
                );
            }
        }

        // If the DR changed, reoriginate LSAs that might have been affected.
        if new_dr != old_dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                });
        }

        next_state
    }

    fn dr_eligible_routers<'a>(
        &'a self,
        router_id: Ipv4Addr,
        neighbors: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = DrCandidate> + 'a {
        let myself = (self.config.priority != 0).then_some(DrCandidate {
            router_id,
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        });

        let nbrs = self
            .state
            .neighbors
            .iter(neighbors)
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority != 0)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            });

        myself.into_iter().chain(nbrs)
    }

    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::Virtual => true,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                self.state.ism_state == State::Dr
                    || self.state.ism_state == State::Backup
                    || self.state.dr == Some(nbr.router_id)
                    || self.state.bdr == Some(nbr.router_id)
            }
        }
    }

    // Enqueues an LSA for transmission out of this interface. The LS Update
    // is sent once the current input has been fully processed, so that LSAs
    // flooded together share the same packets.
    pub(crate) fn enqueue_ls_update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa: Arc<Lsa>,
    ) {
        if self.state.ls_update_list.is_empty() {
            instance.tx.send_lsupd(area.id, self.id, None);
        }
        self.state.ls_update_list.insert(lsa.hdr.key(), lsa);
    }

    pub(crate) fn enqueue_delayed_ack(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_hdr: &LsaHdr,
    ) {
        // Start delayed LS Ack timeout if necessary.
        if self.state.ls_ack_list.is_empty() {
            tasks::iface_timer_start(
                instance.sb,
                area.id,
                self.id,
                IfaceTimer::DelayedAck,
                self.config.ack_delay,
            );
        }
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);
    }

    pub(crate) fn send_packet(
        &self,
        instance: &InstanceUpView<'_>,
        msg: NetTxPacketMsg,
    ) {
        if self.is_passive() {
            return;
        }

        for addr in &msg.dst.addrs {
            if instance.config.trace_opts.packets.tx {
                Debug::PacketTx(&self.name, addr, &msg.packet).log();
            }
            instance
                .sb
                .transport
                .send_packet(&msg.packet, *addr, &self.name, 1);
        }
    }

    // Validates the destination of a received packet.
    pub(crate) fn validate_packet_dst(
        &self,
        dst: Ipv6Addr,
    ) -> Result<(), Error> {
        // Accept only unicast packets on virtual links.
        if self.config.if_type == InterfaceType::Virtual {
            if dst.is_multicast() {
                return Err(Error::InvalidDstAddr(dst));
            } else {
                return Ok(());
            }
        }

        // Check if the destination matches one of the interface unicast
        // addresses.
        if self.system.linklocal_addr == Some(dst)
            || self.system.addr_list.iter().any(|addr| addr.ip() == dst)
        {
            return Ok(());
        }

        // Check if the destination matches AllSPFRouters.
        if dst == ALL_SPF_RTRS {
            return Ok(());
        }

        // Packets whose IP destination is AllDRouters should only be accepted
        // if the state of the receiving interface is DR or Backup.
        if dst == ALL_DR_RTRS && self.is_dr_or_backup() {
            return Ok(());
        }

        Err(Error::InvalidDstAddr(dst))
    }

    // Validates the source of a received packet.
    pub(crate) fn validate_packet_src(
        &self,
        src: Ipv6Addr,
    ) -> Result<(), Error> {
        if !src.is_usable() {
            return Err(Error::InvalidSrcAddr(src));
        }

        Ok(())
    }

    // Validates the parameters of a received Hello packet.
    pub(crate) fn validate_hello(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        hello: &Hello,
    ) -> Result<(), InterfaceCfgError> {
        // Check for HelloInterval mismatch.
        if hello.hello_interval != self.config.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.config.hello_interval,
            ));
        }

        // Check for RouterDeadInterval mismatch.
        if hello.dead_interval != self.config.dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.config.dead_interval,
            ));
        }

        // Check for ExternalRoutingCapability mismatch.
        let e_bit = hello.options.contains(Options::E);
        if e_bit != (area.config.area_type == AreaType::Normal) {
            return Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(
                e_bit,
            ));
        }

        // Check for duplicate Router ID.
        if hello.hdr.router_id == instance.state.router_id {
            return Err(InterfaceCfgError::DuplicateRouterId(
                hello.hdr.router_id,
            ));
        }

        Ok(())
    }

    // Returns the maximum packet size that can be sent on this interface.
    pub(crate) fn max_packet_size(&self) -> u16 {
        let mtu = match self.config.if_type {
            InterfaceType::Virtual => IPV6_MIN_MTU,
            _ => self.system.mtu.unwrap_or(IPV6_MIN_MTU),
        };
        mtu.saturating_sub(IPV6_HDR_SIZE)
    }
}

// ===== impl InterfaceState =====

impl Default for InterfaceState {
    fn default() -> InterfaceState {
        InterfaceState {
            ism_state: Default::default(),
            dr: None,
            bdr: None,
            neighbors: Default::default(),
            ls_update_list: Default::default(),
            ls_ack_list: Default::default(),
            event_count: 0,
            discontinuity_time: Utc::now(),
            lsdb: Default::default(),
        }
    }
}

// ===== helper functions =====

// Runs steps 2 and 3 of the DR election algorithm (RFC 2328 - Section 9.4)
// over the given list of eligible routers.
fn dr_bdr_calc(
    candidates: &[DrCandidate],
) -> (Option<Ipv4Addr>, Option<Ipv4Addr>) {
    // The BDR is chosen among the routers that don't declare themselves DR,
    // preferring the ones that declare themselves BDR.
    let not_dr = || {
        candidates
            .iter()
            .filter(|rtr| rtr.dr != Some(rtr.router_id))
    };
    let bdr = not_dr()
        .filter(|rtr| rtr.bdr == Some(rtr.router_id))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .or_else(|| not_dr().max_by_key(|rtr| (rtr.priority, rtr.router_id)))
        .map(|rtr| rtr.router_id);

    // The DR is chosen among the routers that declare themselves DR. If
    // there are none, the new BDR is promoted.
    let dr = candidates
        .iter()
        .filter(|rtr| rtr.dr == Some(rtr.router_id))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .map(|rtr| rtr.router_id)
        .or(bdr);

    (dr, bdr)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, ip6};

    use super::*;
    use crate::configuration::{AreaCfg, StaticNbrCfg};
    use crate::instance::testing::TestInstance;

    fn candidate(
        router_id: Ipv4Addr,
        priority: u8,
        dr: Option<Ipv4Addr>,
        bdr: Option<Ipv4Addr>,
    ) -> DrCandidate {
        DrCandidate {
            router_id,
            dr,
            bdr,
            priority,
        }
    }

    fn iface(if_type: InterfaceType, priority: u8) -> Interface {
        let config = InterfaceCfg {
            if_type,
            priority,
            ..Default::default()
        };
        let mut iface = Interface::new(1, "eth0".to_owned(), config);
        iface.system.operative = true;
        iface.system.ifindex = Some(2);
        iface.system.mtu = Some(1500);
        iface.system.linklocal_addr = Some(ip6!("fe80::1"));
        iface
    }

    #[test]
    fn dr_election_fresh_network() {
        // Nobody declares itself DR or BDR: the highest (priority, Router ID)
        // becomes BDR and is then promoted to DR.
        let candidates = [
            candidate(ip4!("1.1.1.1"), 1, None, None),
            candidate(ip4!("2.2.2.2"), 1, None, None),
            candidate(ip4!("3.3.3.3"), 0xff, None, None),
        ];
        let (dr, bdr) = dr_bdr_calc(&candidates);
        assert_eq!(dr, Some(ip4!("3.3.3.3")));
        assert_eq!(bdr, Some(ip4!("3.3.3.3")));
    }

    #[test]
    fn dr_election_keeps_existing_roles() {
        // A higher priority router joining the network doesn't preempt the
        // established DR and BDR.
        let dr = Some(ip4!("1.1.1.1"));
        let bdr = Some(ip4!("2.2.2.2"));
        let candidates = [
            candidate(ip4!("1.1.1.1"), 1, dr, bdr),
            candidate(ip4!("2.2.2.2"), 1, dr, bdr),
            candidate(ip4!("9.9.9.9"), 100, None, None),
        ];
        assert_eq!(dr_bdr_calc(&candidates), (dr, bdr));
    }

    #[test]
    fn dr_election_bdr_promotion() {
        // The DR went away: the BDR is promoted and the next best router
        // becomes BDR on the second pass.
        let bdr = Some(ip4!("2.2.2.2"));
        let candidates = [
            candidate(ip4!("2.2.2.2"), 1, None, bdr),
            candidate(ip4!("3.3.3.3"), 1, None, bdr),
        ];
        let (new_dr, new_bdr) = dr_bdr_calc(&candidates);
        assert_eq!(new_dr, bdr);
        assert_eq!(new_bdr, bdr);

        let candidates = [
            candidate(ip4!("2.2.2.2"), 1, new_dr, new_bdr),
            candidate(ip4!("3.3.3.3"), 1, None, bdr),
        ];
        let (new_dr, new_bdr) = dr_bdr_calc(&candidates);
        assert_eq!(new_dr, Some(ip4!("2.2.2.2")));
        assert_eq!(new_bdr, Some(ip4!("3.3.3.3")));
    }

    #[test]
    fn ism_start_states() {
        let mut test = TestInstance::new(ip4!("1.1.1.1"));
        let area = Area::new(1, AreaCfg::default());
        let mut neighbors = Arena::default();
        let lsa_entries = Arena::default();

        let cases = [
            (InterfaceType::Broadcast, 1, State::Waiting),
            (InterfaceType::Broadcast, 0, State::DrOther),
            (InterfaceType::NonBroadcast, 1, State::Waiting),
            (InterfaceType::PointToPoint, 1, State::PointToPoint),
            (InterfaceType::PointToMultipoint, 0, State::PointToPoint),
        ];
        for (if_type, priority, state) in cases {
            let mut iface = iface(if_type, priority);
            let instance = test.view();
            iface.update(&area, &instance, &mut neighbors, &lsa_entries);
            assert_eq!(iface.state.ism_state, state);
        }
    }

    #[test]
    fn ism_wait_timer_elects_self() {
        let mut test = TestInstance::new(ip4!("1.1.1.1"));
        let area = Area::new(1, AreaCfg::default());
        let mut neighbors = Arena::default();
        let lsa_entries = Arena::default();
        let mut iface = iface(InterfaceType::Broadcast, 1);

        let instance = test.view();
        iface.update(&area, &instance, &mut neighbors, &lsa_entries);
        assert_eq!(iface.state.ism_state, State::Waiting);

        // An unexpected event is ignored.
        let event = Event::UnloopInd;
        iface.fsm(&area, &instance, &mut neighbors, &lsa_entries, event);
        assert_eq!(iface.state.ism_state, State::Waiting);

        // Alone on the network, the router elects itself and no BDR is left
        // after the second pass.
        let event = Event::WaitTimer;
        iface.fsm(&area, &instance, &mut neighbors, &lsa_entries, event);
        assert_eq!(iface.state.ism_state, State::Dr);
        assert_eq!(iface.state.dr, Some(ip4!("1.1.1.1")));
        assert_eq!(iface.state.bdr, None);

        // Link down.
        iface.system.operative = false;
        iface.update(&area, &instance, &mut neighbors, &lsa_entries);
        assert_eq!(iface.state.ism_state, State::Down);
        assert_eq!(iface.state.dr, None);
    }

    #[test]
    fn ism_loopback() {
        let mut test = TestInstance::new(ip4!("1.1.1.1"));
        let area = Area::new(1, AreaCfg::default());
        let mut neighbors = Arena::default();
        let lsa_entries = Arena::default();
        let mut iface = iface(InterfaceType::Broadcast, 1);
        iface.system.loopback = true;

        let instance = test.view();
        iface.update(&area, &instance, &mut neighbors, &lsa_entries);
        assert_eq!(iface.state.ism_state, State::Loopback);
        assert!(iface.is_passive());

        iface.system.loopback = false;
        iface.update(&area, &instance, &mut neighbors, &lsa_entries);
        assert_eq!(iface.state.ism_state, State::Waiting);
    }

    #[test]
    fn hello_destinations() {
        let mut test = TestInstance::new(ip4!("1.1.1.1"));
        let area = Area::new(1, AreaCfg::default());
        let mut neighbors = Arena::default();
        let lsa_entries = Arena::default();

        // Broadcast interfaces send Hellos to AllSPFRouters.
        let mut iface = iface(InterfaceType::Broadcast, 1);
        iface.update(&area, &test.view(), &mut neighbors, &lsa_entries);
        assert_eq!(test.sent_to(), vec![ALL_SPF_RTRS]);

        // NBMA interfaces poll the eligible neighbors.
        let mut iface = self::iface(InterfaceType::NonBroadcast, 1);
        iface.config.static_nbrs = vec![
            StaticNbrCfg {
                addr: ip6!("fe80::2"),
                ..Default::default()
            },
            StaticNbrCfg {
                addr: ip6!("fe80::3"),
                priority: 0,
                ..Default::default()
            },
        ];
        iface.update(&area, &test.view(), &mut neighbors, &lsa_entries);
        assert_eq!(test.sent_to(), vec![ip6!("fe80::2")]);
    }

    #[test]
    fn packet_dst_validation() {
        let mut iface = iface(InterfaceType::Broadcast, 1);
        iface.state.ism_state = State::DrOther;
        assert!(iface.validate_packet_dst(ALL_SPF_RTRS).is_ok());
        assert!(iface.validate_packet_dst(ip6!("fe80::1")).is_ok());
        assert!(iface.validate_packet_dst(ALL_DR_RTRS).is_err());
        assert!(iface.validate_packet_dst(ip6!("fe80::99")).is_err());

        iface.state.ism_state = State::Backup;
        assert!(iface.validate_packet_dst(ALL_DR_RTRS).is_ok());
        assert_eq!(iface.max_packet_size(), 1460);
    }
}
