//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use holo_utils::{UnboundedReceiver, UnboundedSender};
use ipnetwork::Ipv6Network;
use tokio::sync::mpsc;
use tracing::debug_span;

use crate::area::Area;
use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, InterfaceId, InterfaceIndex,
    LsaEntryId, Lsdb, LsdbId, NeighborId,
};
use crate::configuration::{InstanceCfg, InterfaceCfg, RangeCfg};
use crate::debug::{Debug, InterfaceInactiveReason, LsaFlushReason};
use crate::error::{ConfigError, Error};
use crate::interface::{Interface, ism};
use crate::lsdb::{self, LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::Packet;
use crate::packet::lsa::{Lsa, LsaBody, LsaKey};
use crate::route::{RouteNet, RouteNetFlags};
use crate::southbound::{self, Southbound};
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    IsmEventMsg, LsaFlushMsg, LsaOrigCheckMsg, LsaOrigEventMsg, NsmEventMsg,
    SendLsUpdateMsg,
};
use crate::tasks::{IfaceTimer, TimerKey};
use crate::{events, spf, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data (present while the instance is running).
    pub state: Option<InstanceState>,
    // Instance arenas.
    pub arenas: InstanceArenas,
    // Internal event queue.
    pub tx: ProtocolInputChannelsTx,
    rx: ProtocolInputChannelsRx,
    // Collaborators.
    pub sb: Southbound,
}

#[derive(Debug)]
pub struct InstanceState {
    // Router ID.
    pub router_id: Ipv4Addr,
    // LSDB of AS-scope LSAs.
    pub lsdb: Lsdb,
    // Seconds elapsed since the instance was started, advanced by the LSDB
    // age tick.
    pub clock: u64,
    // Whether a new SPF run is pending.
    pub spf_requested: bool,
    // Routing table.
    pub rib: BTreeMap<Ipv6Network, RouteNet>,
    // Statistics.
    pub orig_lsa_count: u32,
    pub rx_lsa_count: u32,
    pub spf_run_count: u32,
    pub discontinuity_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub areas: Areas,
    pub interfaces: Arena<Interface>,
    pub neighbors: Arena<Neighbor>,
    pub lsa_entries: Arena<LsaEntry>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Internal events (FSM events, LSA origination, LS Update batching).
    pub protocol_input: UnboundedSender<ProtocolInputMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub protocol_input: UnboundedReceiver<ProtocolInputMsg>,
}

// View of a running instance, handed to the protocol handlers.
pub struct InstanceUpView<'a> {
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a ProtocolInputChannelsTx,
    pub sb: &'a Southbound,
}

// ===== impl Instance =====

impl Instance {
    // Creates a new instance along with its configured areas and interfaces.
    //
    // The instance doesn't do anything until `start` is called.
    pub fn new(config: InstanceCfg, sb: Southbound) -> Result<Instance, Error> {
        config.validate()?;

        let (tx, rx) = protocol_input_channels();
        let mut instance = Instance {
            config: config.clone(),
            state: None,
            arenas: Default::default(),
            tx,
            rx,
            sb,
        };

        for area_cfg in &config.areas {
            instance.arenas.areas.insert(area_cfg.clone())?;
        }
        for (ifname, iface_cfg) in &config.interfaces {
            instance.interface_create(ifname, iface_cfg.clone())?;
        }

        Ok(instance)
    }

    // Starts the instance: brings up the interfaces that are ready, originates
    // the initial LSAs and arms the LSDB age tick.
    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }

        let router_id = self.config.router_id;
        debug_span!("ospfv3-instance", %router_id).in_scope(|| {
            Debug::InstanceStart.log();

            self.state = Some(InstanceState::new(router_id));
            let Some((instance, arenas)) = self.as_up() else {
                return;
            };

            // Start interfaces.
            for area_idx in arenas.areas.indexes().collect::<Vec<_>>() {
                let area = &arenas.areas[area_idx];
                for iface_idx in area.interfaces.indexes() {
                    let iface = &mut arenas.interfaces[iface_idx];
                    iface.update(
                        area,
                        &instance,
                        &mut arenas.neighbors,
                        &arenas.lsa_entries,
                    );
                }
            }

            // Originate the initial Router-LSAs and Intra-Area-Prefix-LSAs.
            for area in arenas.areas.iter() {
                instance.tx.lsa_orig_event(LsaOriginateEvent::AreaStart {
                    area_id: area.id,
                });
            }

            // Start LSDB aging.
            tasks::age_tick_timer(instance.sb);

            self.process_pending();
        })
    }

    // Stops the instance.
    //
    // All self-originated LSAs are flushed from the routing domain before the
    // interfaces are brought down, and all installed routes are withdrawn.
    pub fn shutdown(&mut self) {
        let router_id = self.config.router_id;
        debug_span!("ospfv3-instance", %router_id).in_scope(|| {
            let Some((mut instance, arenas)) = self.as_up() else {
                return;
            };

            Debug::InstanceStop.log();

            // Flush self-originated LSAs and send them out right away.
            lsdb::flush_all_self_originated(&mut instance, arenas);
            self.process_messages();

            let Some((instance, arenas)) = self.as_up() else {
                return;
            };

            // Stop interfaces.
            for area_idx in arenas.areas.indexes().collect::<Vec<_>>() {
                let area = &arenas.areas[area_idx];
                for iface_idx in area.interfaces.indexes() {
                    let iface = &mut arenas.interfaces[iface_idx];
                    if iface.is_down() {
                        continue;
                    }
                    iface.fsm(
                        area,
                        &instance,
                        &mut arenas.neighbors,
                        &arenas.lsa_entries,
                        ism::Event::InterfaceDown(
                            InterfaceInactiveReason::InstanceDown,
                        ),
                    );
                }
            }

            // Uninstall routes.
            for (prefix, route) in &instance.state.rib {
                if route.flags.contains(RouteNetFlags::INSTALLED) {
                    southbound::route_uninstall(instance.sb, prefix);
                }
            }

            // Stop LSDB aging.
            instance.sb.timers.cancel(&TimerKey::AgeTick);

            // Clear the LSDBs and the SPF state.
            for area_idx in arenas.areas.indexes().collect::<Vec<_>>() {
                let area = &mut arenas.areas[area_idx];
                for iface_idx in area.interfaces.indexes() {
                    let iface = &mut arenas.interfaces[iface_idx];
                    iface.state.lsdb = Default::default();
                }
                area.state = Default::default();
            }
            arenas.lsa_entries = Default::default();

            // Events generated while stopping are meaningless now.
            while self.rx.protocol_input.try_recv().is_ok() {}
            self.state = None;
        })
    }

    // Adds a new interface to the instance.
    pub fn add_interface(
        &mut self,
        ifname: &str,
        config: InterfaceCfg,
    ) -> Result<(), Error> {
        let router_id = self.config.router_id;
        let span = debug_span!("ospfv3-instance", %router_id);
        span.in_scope(|| -> Result<(), Error> {
            self.config.validate_interface(ifname, &config)?;
            let (area_idx, iface_idx) =
                self.interface_create(ifname, config.clone())?;
            self.config.interfaces.insert(ifname.to_owned(), config);

            if let Some((instance, arenas)) = self.as_up() {
                let area = &arenas.areas[area_idx];
                let iface = &mut arenas.interfaces[iface_idx];
                iface.update(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                );
            }
            self.process_pending();

            Ok(())
        })
    }

    // Processes an OSPFv3 packet received on the given interface.
    pub fn receive_packet(
        &mut self,
        ifname: &str,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        packet: Packet,
    ) {
        let router_id = self.config.router_id;
        debug_span!("ospfv3-instance", %router_id).in_scope(|| {
            let Some((area_idx, iface_idx)) = self.interface_lookup(ifname)
            else {
                Error::InterfaceNotFound(ifname.to_owned()).log();
                return;
            };
            let Some((mut instance, arenas)) = self.as_up() else {
                return;
            };

            let area_id = arenas.areas[area_idx].id;
            let iface_id = arenas.interfaces[iface_idx].id;
            if let Err(error) = events::process_packet(
                &mut instance,
                arenas,
                area_id,
                iface_id,
                src,
                dst,
                packet,
            ) {
                error.log();
            }

            self.process_pending();
        })
    }

    // Processes the expiration of a timer armed through the timer service.
    pub fn timer_expired(&mut self, key: TimerKey) {
        let router_id = self.config.router_id;
        debug_span!("ospfv3-instance", %router_id).in_scope(|| {
            let Some((mut instance, arenas)) = self.as_up() else {
                return;
            };

            if let Err(error) = process_timer(&mut instance, arenas, key) {
                error.log();
            }

            self.process_pending();
        })
    }

    // Refreshes the system information of the given interface from the
    // address table, starting or stopping the interface as needed.
    pub fn interface_update(&mut self, ifname: &str) -> Result<(), Error> {
        let router_id = self.config.router_id;
        let span = debug_span!("ospfv3-instance", %router_id);
        span.in_scope(|| -> Result<(), Error> {
            let (area_idx, iface_idx) = self
                .interface_lookup(ifname)
                .ok_or_else(|| Error::InterfaceNotFound(ifname.to_owned()))?;
            let addr_change = self.interface_sys_sync(area_idx, iface_idx);

            if let Some((instance, arenas)) = self.as_up() {
                let area = &arenas.areas[area_idx];
                let iface = &mut arenas.interfaces[iface_idx];
                iface.update(
                    area,
                    &instance,
                    &mut arenas.neighbors,
                    &arenas.lsa_entries,
                );

                // Readvertise the interface prefixes.
                if addr_change && !iface.is_down() {
                    instance.tx.lsa_orig_event(
                        LsaOriginateEvent::InterfaceAddrAddDel {
                            area_id: area.id,
                            iface_id: iface.id,
                        },
                    );
                }
            }
            self.process_pending();

            Ok(())
        })
    }

    // Changes the output cost of the given interface.
    pub fn set_interface_cost(
        &mut self,
        ifname: &str,
        cost: u32,
    ) -> Result<(), Error> {
        let router_id = self.config.router_id;
        let span = debug_span!("ospfv3-instance", %router_id);
        span.in_scope(|| -> Result<(), Error> {
            let (area_idx, iface_idx) = self
                .interface_lookup(ifname)
                .ok_or_else(|| Error::InterfaceNotFound(ifname.to_owned()))?;

            let iface = &mut self.arenas.interfaces[iface_idx];
            let mut config = iface.config.clone();
            config.cost = cost;
            self.config.validate_interface(ifname, &config)?;
            if iface.config.cost == cost {
                return Ok(());
            }
            iface.config.cost = cost;
            self.config.interfaces.insert(ifname.to_owned(), config);

            if let Some((instance, arenas)) = self.as_up() {
                let area = &arenas.areas[area_idx];
                instance.tx.lsa_orig_event(
                    LsaOriginateEvent::InterfaceCostChange { area_id: area.id },
                );
            }
            self.process_pending();

            Ok(())
        })
    }

    // Replaces the address ranges of the given area.
    pub fn set_area_ranges(
        &mut self,
        area_id: Ipv4Addr,
        ranges: BTreeMap<Ipv6Network, RangeCfg>,
    ) -> Result<(), Error> {
        let router_id = self.config.router_id;
        let span = debug_span!("ospfv3-instance", %router_id);
        span.in_scope(|| -> Result<(), Error> {
            let (_, area) = self
                .arenas
                .areas
                .get_mut_by_area_id(area_id)
                .ok_or(Error::AreaNotFound(area_id))?;

            let mut config = area.config.clone();
            config.ranges = ranges;
            config.validate()?;
            area.config = config.clone();
            if let Some(area_cfg) = self
                .config
                .areas
                .iter_mut()
                .find(|area_cfg| area_cfg.area_id == area_id)
            {
                *area_cfg = config;
            }

            // Summaries are recomputed along with the routing table.
            if let Some((instance, _)) = self.as_up() {
                instance.state.spf_requested = true;
            }
            self.process_pending();

            Ok(())
        })
    }

    // Enables or disables stub router advertisement (RFC 6987).
    pub fn set_stub_router(&mut self, stub_router: bool) {
        if self.config.stub_router == stub_router {
            return;
        }

        let router_id = self.config.router_id;
        debug_span!("ospfv3-instance", %router_id).in_scope(|| {
            self.config.stub_router = stub_router;
            if let Some((instance, _)) = self.as_up() {
                instance
                    .tx
                    .lsa_orig_event(LsaOriginateEvent::StubRouterChange);
            }
            self.process_pending();
        })
    }

    // Returns whether the instance is running.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.config.router_id
    }

    // Returns an iterator over the routing table.
    pub fn routes(&self) -> impl Iterator<Item = (&Ipv6Network, &RouteNet)> {
        self.state.iter().flat_map(|state| state.rib.iter())
    }

    // Returns the routing table entry of the given prefix.
    pub fn route(&self, prefix: &Ipv6Network) -> Option<&RouteNet> {
        self.state.as_ref()?.rib.get(prefix)
    }

    pub fn area(&self, area_id: Ipv4Addr) -> Option<&Area> {
        self.arenas
            .areas
            .get_by_area_id(area_id)
            .map(|(_, area)| area)
    }

    pub fn interface(&self, ifname: &str) -> Option<&Interface> {
        self.interface_lookup(ifname)
            .map(|(_, iface_idx)| &self.arenas.interfaces[iface_idx])
    }

    // Returns the neighbors attached to the given interface, ordered by their
    // Router IDs.
    pub fn neighbors(&self, ifname: &str) -> Vec<&Neighbor> {
        let Some(iface) = self.interface(ifname) else {
            return vec![];
        };
        let mut nbrs = iface
            .state
            .neighbors
            .iter(&self.arenas.neighbors)
            .collect::<Vec<_>>();
        nbrs.sort_by_key(|nbr| nbr.router_id);
        nbrs
    }

    pub fn neighbor(
        &self,
        ifname: &str,
        router_id: Ipv4Addr,
    ) -> Option<&Neighbor> {
        let iface = self.interface(ifname)?;
        iface
            .state
            .neighbors
            .get_by_router_id(&self.arenas.neighbors, router_id)
            .map(|(_, nbr)| nbr)
    }

    // Returns the state of the given neighbor, if it exists.
    pub fn neighbor_state(
        &self,
        ifname: &str,
        router_id: Ipv4Addr,
    ) -> Option<nsm::State> {
        self.neighbor(ifname, router_id).map(|nbr| nbr.state)
    }

    // Returns all LSAs from the AS-scope LSDB.
    pub fn as_lsas(&self) -> Vec<Arc<Lsa>> {
        self.state
            .as_ref()
            .map(|state| self.lsdb_lsas(&state.lsdb))
            .unwrap_or_default()
    }

    // Returns all LSAs from the LSDB of the given area.
    pub fn area_lsas(&self, area_id: Ipv4Addr) -> Vec<Arc<Lsa>> {
        self.area(area_id)
            .map(|area| self.lsdb_lsas(&area.state.lsdb))
            .unwrap_or_default()
    }

    // Returns all LSAs from the link-scope LSDB of the given interface.
    pub fn link_lsas(&self, ifname: &str) -> Vec<Arc<Lsa>> {
        self.interface(ifname)
            .map(|iface| self.lsdb_lsas(&iface.state.lsdb))
            .unwrap_or_default()
    }

    // Looks up an LSA in the area-scope or AS-scope LSDB its type belongs
    // to.
    pub fn lsa(&self, area_id: Ipv4Addr, key: &LsaKey) -> Option<Arc<Lsa>> {
        let state = self.state.as_ref()?;
        let area = self.area(area_id)?;
        area.state
            .lsdb
            .get(&self.arenas.lsa_entries, key)
            .or_else(|| state.lsdb.get(&self.arenas.lsa_entries, key))
            .map(|(_, lse)| lse.data.clone())
    }

    // Returns a view of the running instance along with its arenas.
    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        let state = self.state.as_mut()?;
        let instance = InstanceUpView {
            config: &self.config,
            state,
            tx: &self.tx,
            sb: &self.sb,
        };
        Some((instance, &mut self.arenas))
    }

    fn interface_create(
        &mut self,
        ifname: &str,
        config: InterfaceCfg,
    ) -> Result<(AreaIndex, InterfaceIndex), Error> {
        // Interface names are unique across all areas.
        if self.interface_lookup(ifname).is_some() {
            return Err(Error::DuplicateInterface(ifname.to_owned()));
        }

        let area_id = config.area_id;
        let (area_idx, area) = self
            .arenas
            .areas
            .get_mut_by_area_id(area_id)
            .ok_or_else(|| {
                ConfigError::UnknownArea(ifname.to_owned(), area_id)
            })?;
        let (iface_idx, _) =
            area.interfaces
                .insert(&mut self.arenas.interfaces, ifname, config)?;

        // Fetch the interface's system information.
        self.interface_sys_sync(area_idx, iface_idx);

        Ok((area_idx, iface_idx))
    }

    fn interface_lookup(
        &self,
        ifname: &str,
    ) -> Option<(AreaIndex, InterfaceIndex)> {
        self.arenas.areas.indexes().find_map(|area_idx| {
            let area = &self.arenas.areas[area_idx];
            area.interfaces
                .get_by_name(&self.arenas.interfaces, ifname)
                .map(|(iface_idx, _)| (area_idx, iface_idx))
        })
    }

    // Copies the interface's system information from the address table.
    //
    // Returns whether the interface addresses have changed.
    fn interface_sys_sync(
        &mut self,
        area_idx: AreaIndex,
        iface_idx: InterfaceIndex,
    ) -> bool {
        let addresses = &self.sb.addresses;
        let area = &mut self.arenas.areas[area_idx];
        let iface = &mut self.arenas.interfaces[iface_idx];
        let ifname = iface.name.clone();

        let ifindex = addresses.ifindex(&ifname);
        if iface.system.ifindex != ifindex {
            area.interfaces.update_ifindex(iface_idx, iface, ifindex);
        }
        iface.system.operative = addresses.is_operative(&ifname);
        iface.system.loopback = addresses.is_loopback(&ifname);
        iface.system.mtu = addresses.mtu(&ifname);

        let linklocal_addr = addresses.linklocal(&ifname);
        let addr_list = addresses.addresses(&ifname);
        let addr_change = iface.system.linklocal_addr != linklocal_addr
            || iface.system.addr_list != addr_list;
        iface.system.linklocal_addr = linklocal_addr;
        iface.system.addr_list = addr_list;

        addr_change
    }

    // Drains the internal event queue, runs SPF if requested, and then
    // drains the events generated by the SPF run.
    fn process_pending(&mut self) {
        self.process_messages();

        if let Some((mut instance, arenas)) = self.as_up()
            && instance.state.spf_requested
        {
            spf::run(&mut instance, arenas);
            self.process_messages();
        }
    }

    fn process_messages(&mut self) {
        while let Ok(msg) = self.rx.protocol_input.try_recv() {
            // Ignore event if the instance isn't active.
            if let Some((mut instance, arenas)) = self.as_up()
                && let Err(error) =
                    process_protocol_msg(&mut instance, arenas, msg)
            {
                error.log();
            }
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    pub(crate) fn new(router_id: Ipv4Addr) -> InstanceState {
        InstanceState {
            router_id,
            lsdb: Default::default(),
            clock: 0,
            spf_requested: false,
            rib: Default::default(),
            orig_lsa_count: 0,
            rx_lsa_count: 0,
            spf_run_count: 0,
            discontinuity_time: Utc::now(),
        }
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn ism_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        event: ism::Event,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::IsmEvent(
            IsmEventMsg {
                area_id,
                iface_id,
                event,
            },
        ));
    }

    pub(crate) fn nsm_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
        event: nsm::Event,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::NsmEvent(
            NsmEventMsg {
                area_id,
                iface_id,
                nbr_id,
                event,
            },
        ));
    }

    pub(crate) fn send_lsupd(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: Option<NeighborId>,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::SendLsUpdate(
            SendLsUpdateMsg {
                area_id,
                iface_id,
                nbr_id,
            },
        ));
    }

    pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent) {
        let _ = self
            .protocol_input
            .send(ProtocolInputMsg::LsaOrigEvent(LsaOrigEventMsg { event }));
    }

    pub(crate) fn lsa_orig_check(
        &self,
        lsdb_id: LsdbId,
        lsa_id: Ipv4Addr,
        lsa_body: LsaBody,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::LsaOrigCheck(
            LsaOrigCheckMsg {
                lsdb_id,
                lsa_id,
                lsa_body,
            },
        ));
    }

    pub(crate) fn lsa_flush(
        &self,
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
        reason: LsaFlushReason,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::LsaFlush(
            LsaFlushMsg {
                lsdb_id,
                lse_id,
                reason,
            },
        ));
    }
}

// ===== helper functions =====

impl Instance {
    fn lsdb_lsas(&self, lsdb: &Lsdb) -> Vec<Arc<Lsa>> {
        lsdb.iter(&self.arenas.lsa_entries)
            .map(|(_, lse)| lse.data.clone())
            .collect()
    }
}

fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (protocol_inputp, protocol_inputc) = mpsc::unbounded_channel();

    let tx = ProtocolInputChannelsTx {
        protocol_input: protocol_inputp,
    };
    let rx = ProtocolInputChannelsRx {
        protocol_input: protocol_inputc,
    };

    (tx, rx)
}

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => events::process_ism_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.event,
        )?,
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => events::process_nsm_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
            msg.event,
        )?,
        // Request to send LS Update.
        ProtocolInputMsg::SendLsUpdate(msg) => events::process_send_lsupd(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
        )?,
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(msg) => {
            events::process_lsa_orig_event(instance, arenas, msg.event)?
        }
        // LSA origination check.
        ProtocolInputMsg::LsaOrigCheck(msg) => events::process_lsa_orig_check(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lsa_id,
            msg.lsa_body,
        )?,
        // LSA flush.
        ProtocolInputMsg::LsaFlush(msg) => events::process_lsa_flush(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lse_id,
            msg.reason,
        )?,
    }

    Ok(())
}

fn process_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    key: TimerKey,
) -> Result<(), Error> {
    match key {
        TimerKey::AgeTick => {
            events::process_age_tick(instance, arenas);
        }
        TimerKey::Iface {
            area_id,
            iface_id,
            timer,
        } => match timer {
            IfaceTimer::Hello => events::process_hello_interval(
                instance, arenas, area_id, iface_id,
            )?,
            IfaceTimer::Wait => {
                events::process_wait_timer(instance, arenas, area_id, iface_id)?
            }
            IfaceTimer::DelayedAck => events::process_delayed_ack_timeout(
                instance, arenas, area_id, iface_id,
            )?,
        },
        TimerKey::NbmaPoll {
            area_id,
            iface_id,
            addr,
        } => events::process_nbma_poll(
            instance, arenas, area_id, iface_id, addr,
        )?,
        TimerKey::Nbr {
            area_id,
            iface_id,
            nbr_id,
            timer,
        } => events::process_nbr_timer(
            instance, arenas, area_id, iface_id, nbr_id, timer,
        )?,
    }

    Ok(())
}

// ===== test helpers =====

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    use holo_utils::task::ManualTimers;

    use super::*;
    use crate::southbound::{AddressTable, RouteEntry, RouteSink, Transport};

    type SentPackets = Rc<RefCell<Vec<(Ipv6Addr, Packet)>>>;

    // Standalone instance state for exercising the protocol handlers
    // directly.
    pub(crate) struct TestInstance {
        pub config: InstanceCfg,
        pub state: InstanceState,
        pub tx: ProtocolInputChannelsTx,
        pub rx: ProtocolInputChannelsRx,
        pub sb: Southbound,
        pub timers: Rc<ManualTimers<TimerKey>>,
        sent: SentPackets,
    }

    struct TestTransport(SentPackets);

    struct TestAddresses;

    struct TestRoutes;

    impl TestInstance {
        pub(crate) fn new(router_id: Ipv4Addr) -> TestInstance {
            let (tx, rx) = protocol_input_channels();
            let timers = Rc::new(ManualTimers::new());
            let sent = SentPackets::default();
            let sb = Southbound {
                transport: Box::new(TestTransport(sent.clone())),
                addresses: Box::new(TestAddresses),
                routes: Box::new(TestRoutes),
                timers: Box::new(timers.clone()),
            };
            let config = InstanceCfg {
                router_id,
                ..Default::default()
            };

            TestInstance {
                config,
                state: InstanceState::new(router_id),
                tx,
                rx,
                sb,
                timers,
                sent,
            }
        }

        pub(crate) fn view(&mut self) -> InstanceUpView<'_> {
            InstanceUpView {
                config: &self.config,
                state: &mut self.state,
                tx: &self.tx,
                sb: &self.sb,
            }
        }

        // Returns the destinations of the packets sent so far, clearing the
        // transmission log.
        pub(crate) fn sent_to(&self) -> Vec<Ipv6Addr> {
            std::mem::take(&mut *self.sent.borrow_mut())
                .into_iter()
                .map(|(dst, _)| dst)
                .collect()
        }

        // Returns the packets sent so far, clearing the transmission log.
        pub(crate) fn sent_packets(&self) -> Vec<Packet> {
            std::mem::take(&mut *self.sent.borrow_mut())
                .into_iter()
                .map(|(_, packet)| packet)
                .collect()
        }
    }

    impl Transport for TestTransport {
        fn send_packet(
            &self,
            packet: &Packet,
            dst: Ipv6Addr,
            _ifname: &str,
            _hop_limit: u8,
        ) {
            self.0.borrow_mut().push((dst, packet.clone()));
        }
    }

    impl AddressTable for TestAddresses {
        fn ifindex(&self, _ifname: &str) -> Option<u32> {
            None
        }

        fn is_operative(&self, _ifname: &str) -> bool {
            false
        }

        fn mtu(&self, _ifname: &str) -> Option<u16> {
            None
        }

        fn linklocal(&self, _ifname: &str) -> Option<Ipv6Addr> {
            None
        }

        fn addresses(&self, _ifname: &str) -> BTreeSet<Ipv6Network> {
            BTreeSet::new()
        }
    }

    impl RouteSink for TestRoutes {
        fn install(&self, _route: &RouteEntry) {}

        fn uninstall(&self, _prefix: &Ipv6Network) {}
    }
}
