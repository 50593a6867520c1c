//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use holo_ospfv3::area::AreaType;
use holo_ospfv3::configuration::{AreaCfg, InstanceCfg, InterfaceCfg};
use holo_ospfv3::instance::Instance;
use holo_ospfv3::interface::{InterfaceType, ism};
use holo_ospfv3::neighbor::nsm;
use holo_ospfv3::packet::lsa::{Lsa, LsaKey};
use holo_ospfv3::packet::{
    ALL_DR_RTRS, ALL_SPF_RTRS, LsUpdate, Packet, PacketHdr, PacketType,
};
use holo_ospfv3::southbound::{
    AddressTable, RouteEntry, RouteSink, Southbound, Transport,
};
use holo_ospfv3::tasks::TimerKey;
use holo_utils::task::ManualTimers;
use ipnetwork::Ipv6Network;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

pub const BACKBONE: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// System view of an interface, as exposed through the address table.
#[derive(Clone, Debug)]
pub struct SysIface {
    pub ifindex: u32,
    pub operative: bool,
    pub loopback: bool,
    pub mtu: u16,
    pub linklocal: Ipv6Addr,
    pub addresses: BTreeSet<Ipv6Network>,
}

type SysIfaces = Rc<RefCell<BTreeMap<String, SysIface>>>;
type Outbox = Rc<RefCell<VecDeque<TxPacket>>>;
type Routes = Rc<RefCell<BTreeMap<Ipv6Network, RouteEntry>>>;

#[derive(Clone, Debug)]
pub struct TxPacket {
    pub router: String,
    pub ifname: String,
    pub dst: Ipv6Addr,
    pub packet: Packet,
}

// Simulated router: an OSPFv3 instance wired to in-memory collaborators.
pub struct Router {
    pub instance: Instance,
    pub timers: Rc<ManualTimers<TimerKey>>,
    pub routes: Routes,
    pub sys: SysIfaces,
    // Neighbor states observed after every input, in order.
    pub nbr_trace: BTreeMap<(String, Ipv4Addr), Vec<nsm::State>>,
    number: u16,
}

// Set of simulated routers and the links connecting them.
//
// Packets are delivered instantly. Time only moves forward when the earliest
// armed timer of all routers fires.
pub struct Network {
    pub routers: BTreeMap<String, Router>,
    links: Vec<Vec<(String, String)>>,
    outbox: Outbox,
    // Every packet sent so far, in transmission order.
    pub sent: Vec<(Duration, TxPacket)>,
    // Packet types silently discarded on reception by an interface.
    rx_drops: Vec<(String, String, PacketType)>,
    nsm_log: NsmLog,
    now: Duration,
    _trace_guard: DefaultGuard,
}

// Neighbor FSM transitions, keyed by (local Router ID, neighbor Router ID).
//
// Collected from the debug events emitted by the instances, so each entry
// holds the formatted (event, new state) pair.
#[derive(Clone, Default)]
pub struct NsmLog(Arc<Mutex<NsmLogInner>>);

#[derive(Default)]
struct NsmLogInner {
    last_event: BTreeMap<(String, String), String>,
    transitions: BTreeMap<(String, String), Vec<(String, String)>>,
}

#[derive(Default)]
struct TraceFields(BTreeMap<&'static str, String>);

struct NetTransport {
    router: String,
    outbox: Outbox,
}

struct NetAddresses(SysIfaces);

struct NetRoutes(Routes);

// ===== impl Network =====

impl Network {
    pub fn new() -> Network {
        let nsm_log = NsmLog::default();
        let subscriber = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(EnvFilter::from_default_env()),
            )
            .with(nsm_log.clone());
        let trace_guard = tracing::subscriber::set_default(subscriber);

        Network {
            routers: Default::default(),
            links: Default::default(),
            outbox: Default::default(),
            sent: Default::default(),
            rx_drops: Default::default(),
            nsm_log,
            now: Duration::ZERO,
            _trace_guard: trace_guard,
        }
    }

    pub fn add_router(
        &mut self,
        name: &str,
        router_id: Ipv4Addr,
        areas: &[(Ipv4Addr, AreaType)],
    ) {
        let timers = Rc::new(ManualTimers::new());
        let routes = Routes::default();
        let sys = SysIfaces::default();
        let sb = Southbound {
            transport: Box::new(NetTransport {
                router: name.to_owned(),
                outbox: self.outbox.clone(),
            }),
            addresses: Box::new(NetAddresses(sys.clone())),
            routes: Box::new(NetRoutes(routes.clone())),
            timers: Box::new(timers.clone()),
        };
        let config = InstanceCfg {
            router_id,
            areas: areas
                .iter()
                .map(|(area_id, area_type)| AreaCfg {
                    area_id: *area_id,
                    area_type: *area_type,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let instance = Instance::new(config, sb).expect("invalid config");

        let number = self.routers.len() as u16 + 1;
        self.routers.insert(
            name.to_owned(),
            Router {
                instance,
                timers,
                routes,
                sys,
                nbr_trace: Default::default(),
                number,
            },
        );
    }

    // Adds an interface to the given router, allocating its ifindex and
    // link-local address.
    pub fn add_interface(
        &mut self,
        router: &str,
        ifname: &str,
        config: InterfaceCfg,
        addresses: &[Ipv6Network],
        loopback: bool,
    ) {
        let rt = self.router_mut(router);
        let ifindex = rt.sys.borrow().len() as u32 + 1;
        let linklocal =
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, rt.number, ifindex as u16);
        rt.sys.borrow_mut().insert(
            ifname.to_owned(),
            SysIface {
                ifindex,
                operative: true,
                loopback,
                mtu: 1500,
                linklocal,
                addresses: addresses.iter().copied().collect(),
            },
        );
        rt.instance
            .add_interface(ifname, config)
            .expect("failed to add interface");
    }

    // Connects two routers through a point-to-point link numbered out of the
    // given prefix.
    pub fn p2p_link(
        &mut self,
        a: (&str, &str),
        b: (&str, &str),
        area_id: Ipv4Addr,
        cost: u32,
        prefix: &str,
    ) {
        let config = InterfaceCfg {
            area_id,
            if_type: InterfaceType::PointToPoint,
            cost,
            ..Default::default()
        };
        for (host, (router, ifname)) in [a, b].into_iter().enumerate() {
            let addr = host_addr(prefix, host as u128 + 1);
            self.add_interface(router, ifname, config.clone(), &[addr], false);
        }
        self.connect(&[a, b]);
    }

    // Connects a set of routers through a broadcast segment.
    pub fn broadcast_link(
        &mut self,
        ends: &[(&str, &str, u8)],
        area_id: Ipv4Addr,
        cost: u32,
        prefix: &str,
    ) {
        for (host, (router, ifname, priority)) in ends.iter().enumerate() {
            let config = InterfaceCfg {
                area_id,
                if_type: InterfaceType::Broadcast,
                cost,
                priority: *priority,
                ..Default::default()
            };
            let addr = host_addr(prefix, host as u128 + 1);
            self.add_interface(router, ifname, config, &[addr], false);
        }
        let ends = ends
            .iter()
            .map(|(router, ifname, _)| (*router, *ifname))
            .collect::<Vec<_>>();
        self.connect(&ends);
    }

    // Attaches a stub network to the given router.
    pub fn stub_network(
        &mut self,
        router: &str,
        ifname: &str,
        area_id: Ipv4Addr,
        cost: u32,
        prefix: &str,
    ) {
        let config = InterfaceCfg {
            area_id,
            passive: true,
            cost,
            priority: 0,
            ..Default::default()
        };
        let addr = host_addr(prefix, 1);
        self.add_interface(router, ifname, config, &[addr], false);
    }

    // Adds a loopback interface with the given host address.
    pub fn loopback(
        &mut self,
        router: &str,
        ifname: &str,
        area_id: Ipv4Addr,
        addr: &str,
    ) {
        let config = InterfaceCfg {
            area_id,
            ..Default::default()
        };
        let addr = format!("{addr}/128").parse().expect("invalid address");
        self.add_interface(router, ifname, config, &[addr], true);
    }

    pub fn connect(&mut self, ends: &[(&str, &str)]) {
        self.links.push(
            ends.iter()
                .map(|(router, ifname)| {
                    ((*router).to_owned(), (*ifname).to_owned())
                })
                .collect(),
        );
    }

    pub fn start(&mut self) {
        for rt in self.routers.values_mut() {
            rt.instance.start();
            rt.trace_neighbors();
        }
        self.deliver();
    }

    // Runs the simulation for the given amount of time.
    pub fn run_for(&mut self, duration: Duration) {
        let until = self.now + duration;
        self.deliver();

        loop {
            // Pick the router owning the earliest timer.
            let next = self
                .routers
                .iter()
                .filter_map(|(name, rt)| {
                    rt.timers
                        .next_deadline()
                        .map(|deadline| (deadline, name.clone()))
                })
                .min();
            let Some((deadline, name)) = next else {
                break;
            };
            if deadline > until {
                break;
            }

            self.now = self.now.max(deadline);
            for rt in self.routers.values() {
                rt.timers.advance_to(self.now);
            }
            let rt = self.router_mut(&name);
            if let Some(key) = rt.timers.fire_next(deadline) {
                rt.instance.timer_expired(key);
                rt.trace_neighbors();
            }
            self.deliver();
        }

        self.now = until;
        for rt in self.routers.values() {
            rt.timers.advance_to(until);
        }
    }

    pub fn run_secs(&mut self, secs: u64) {
        self.run_for(Duration::from_secs(secs));
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn router(&self, name: &str) -> &Router {
        self.routers.get(name).expect("unknown router")
    }

    pub fn router_mut(&mut self, name: &str) -> &mut Router {
        self.routers.get_mut(name).expect("unknown router")
    }

    pub fn linklocal(&self, router: &str, ifname: &str) -> Ipv6Addr {
        self.router(router).sys_iface(ifname).linklocal
    }

    // Changes the operational status of an interface.
    pub fn set_operative(&mut self, router: &str, ifname: &str, up: bool) {
        let rt = self.router_mut(router);
        if let Some(iface) = rt.sys.borrow_mut().get_mut(ifname) {
            iface.operative = up;
        }
        rt.instance
            .interface_update(ifname)
            .expect("unknown interface");
        rt.trace_neighbors();
        self.deliver();
    }

    // Delivers a packet to a router as if it was sent by a neighbor over the
    // given link.
    pub fn inject_packet(
        &mut self,
        (router, ifname): (&str, &str),
        (src_router, src_ifname): (&str, &str),
        packet: Packet,
    ) {
        let src = self.linklocal(src_router, src_ifname);
        let rt = self.router_mut(router);
        rt.instance.receive_packet(ifname, src, ALL_SPF_RTRS, packet);
        rt.trace_neighbors();
        self.deliver();
    }

    // Delivers an LS Update to a router as if it was sent by a neighbor over
    // the given link.
    pub fn inject_lsupd(
        &mut self,
        dst: (&str, &str),
        src: (&str, &str),
        area_id: Ipv4Addr,
        lsas: Vec<Lsa>,
    ) {
        let hdr = self.packet_hdr(src.0, PacketType::LsUpdate, area_id);
        let packet = Packet::LsUpdate(LsUpdate { hdr, lsas });
        self.inject_packet(dst, src, packet);
    }

    // Returns the header of a packet originated by the given router.
    pub fn packet_hdr(
        &self,
        router: &str,
        pkt_type: PacketType,
        area_id: Ipv4Addr,
    ) -> PacketHdr {
        let router_id = self.router(router).instance.router_id();
        PacketHdr::new(pkt_type, router_id, area_id, 0)
    }

    // Makes an interface discard the given types of packets on reception.
    pub fn drop_rx(
        &mut self,
        router: &str,
        ifname: &str,
        types: &[PacketType],
    ) {
        for pkt_type in types {
            self.rx_drops
                .push((router.to_owned(), ifname.to_owned(), *pkt_type));
        }
    }

    // Resumes reception of all packet types on an interface.
    pub fn accept_rx(&mut self, router: &str, ifname: &str) {
        self.rx_drops
            .retain(|(rt, name, _)| rt != router || name != ifname);
    }

    // Returns the instances of the given LSA sent by a router on an
    // interface, along with the time they were sent.
    pub fn sent_lsas(
        &self,
        router: &str,
        ifname: &str,
        key: &LsaKey,
    ) -> Vec<(Duration, Lsa)> {
        self.sent
            .iter()
            .filter(|(_, tx)| tx.router == router && tx.ifname == ifname)
            .filter_map(|(time, tx)| match &tx.packet {
                Packet::LsUpdate(lsupd) => Some((time, lsupd)),
                _ => None,
            })
            .flat_map(|(time, lsupd)| {
                lsupd
                    .lsas
                    .iter()
                    .filter(|lsa| lsa.hdr.key() == *key)
                    .map(|lsa| (*time, lsa.clone()))
            })
            .collect()
    }

    // Returns the FSM transitions of a neighbor as seen by the given router.
    pub fn nsm_transitions(
        &self,
        router: &str,
        nbr_router_id: Ipv4Addr,
    ) -> Vec<(String, String)> {
        let router_id = self.router(router).instance.router_id();
        let key = (router_id.to_string(), nbr_router_id.to_string());
        self.nsm_log
            .0
            .lock()
            .unwrap()
            .transitions
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    // Returns whether all routers attached to the given area hold the same
    // instances of the area-scope LSAs.
    pub fn area_synchronized(&self, area_id: Ipv4Addr) -> bool {
        let lsdbs = self
            .routers
            .values()
            .filter(|rt| rt.instance.area(area_id).is_some())
            .map(|rt| rt.lsdb_summary(area_id))
            .collect::<Vec<_>>();
        lsdbs.windows(2).all(|pair| pair[0] == pair[1])
    }

    fn deliver(&mut self) {
        loop {
            let tx = self.outbox.borrow_mut().pop_front();
            let Some(tx) = tx else {
                break;
            };
            self.sent.push((self.now, tx.clone()));

            let ends = self
                .links
                .iter()
                .find(|link| {
                    link.iter().any(|(router, ifname)| {
                        *router == tx.router && *ifname == tx.ifname
                    })
                })
                .map(|link| {
                    link.iter()
                        .filter(|(router, ifname)| {
                            *router != tx.router || *ifname != tx.ifname
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if !self.router(&tx.router).sys_iface(&tx.ifname).operative {
                continue;
            }

            let src = self.linklocal(&tx.router, &tx.ifname);
            for (router, ifname) in ends {
                let rt = self.router(&router);
                let sys_iface = rt.sys_iface(&ifname);
                if !sys_iface.operative || !rt.accepts(&ifname, tx.dst) {
                    continue;
                }
                let pkt_type = tx.packet.hdr().pkt_type;
                if self.rx_drops.iter().any(|(rt, name, drop_type)| {
                    *rt == router && *name == ifname && *drop_type == pkt_type
                }) {
                    continue;
                }

                let rt = self.router_mut(&router);
                rt.instance
                    .receive_packet(&ifname, src, tx.dst, tx.packet.clone());
                rt.trace_neighbors();
            }
        }
    }
}

// ===== impl Router =====

impl Router {
    pub fn sys_iface(&self, ifname: &str) -> SysIface {
        self.sys
            .borrow()
            .get(ifname)
            .cloned()
            .expect("unknown interface")
    }

    // Returns the route installed for the given prefix.
    pub fn route(&self, prefix: &str) -> Option<RouteEntry> {
        let prefix: Ipv6Network = prefix.parse().expect("invalid prefix");
        self.routes.borrow().get(&prefix).cloned()
    }

    // Returns the next hops of the route installed for the given prefix.
    pub fn nexthops(&self, prefix: &str) -> BTreeSet<(String, Ipv6Addr)> {
        self.route(prefix)
            .map(|route| {
                route
                    .nexthops
                    .into_iter()
                    .filter_map(|nh| nh.addr.map(|addr| (nh.ifname, addr)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn nbr_state(
        &self,
        ifname: &str,
        router_id: Ipv4Addr,
    ) -> Option<nsm::State> {
        self.instance.neighbor_state(ifname, router_id)
    }

    pub fn ism_state(&self, ifname: &str) -> ism::State {
        self.instance
            .interface(ifname)
            .map(|iface| iface.state.ism_state)
            .unwrap_or_default()
    }

    // Returns the (key, sequence number) of the LSAs of the given area.
    pub fn lsdb_summary(&self, area_id: Ipv4Addr) -> BTreeSet<(LsaKey, u32)> {
        self.instance
            .area_lsas(area_id)
            .iter()
            .map(|lsa| (lsa.hdr.key(), lsa.hdr.seq_no))
            .collect()
    }

    pub fn lsa(&self, area_id: Ipv4Addr, key: &LsaKey) -> Option<Arc<Lsa>> {
        self.instance.lsa(area_id, key)
    }

    // Packets sent to AllDRouters are only received by the DR and the BDR.
    fn accepts(&self, ifname: &str, dst: Ipv6Addr) -> bool {
        if dst == ALL_SPF_RTRS {
            return true;
        }
        if dst == ALL_DR_RTRS {
            return matches!(
                self.ism_state(ifname),
                ism::State::Dr | ism::State::Backup
            );
        }
        dst == self.sys_iface(ifname).linklocal
    }

    fn trace_neighbors(&mut self) {
        let ifnames = self.sys.borrow().keys().cloned().collect::<Vec<_>>();
        for ifname in ifnames {
            for nbr in self.instance.neighbors(&ifname) {
                let trace = self
                    .nbr_trace
                    .entry((ifname.clone(), nbr.router_id))
                    .or_default();
                if trace.last() != Some(&nbr.state) {
                    trace.push(nbr.state);
                }
            }
        }
    }
}

// ===== impl NsmLog =====

impl<S> Layer<S> for NsmLog
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &Attributes<'_>,
        id: &Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = TraceFields::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(fields);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };

        // Find the local and neighbor Router IDs in the parent spans.
        let mut router_id = None;
        let mut nbr_router_id = None;
        for span in scope {
            let extensions = span.extensions();
            let Some(fields) = extensions.get::<TraceFields>() else {
                continue;
            };
            match span.name() {
                "ospfv3-instance" => {
                    router_id = fields.0.get("router_id").cloned();
                }
                "neighbor" => {
                    nbr_router_id = fields.0.get("router_id").cloned();
                }
                _ => (),
            }
        }
        let (Some(router_id), Some(nbr_router_id)) = (router_id, nbr_router_id)
        else {
            return;
        };

        let mut fields = TraceFields::default();
        event.record(&mut fields);
        let key = (router_id, nbr_router_id);
        let mut log = self.0.lock().unwrap();
        match fields.0.get("message").map(String::as_str) {
            Some("event") => {
                if let Some(nsm_event) = fields.0.get("event") {
                    log.last_event.insert(key, nsm_event.clone());
                }
            }
            Some("state transition") => {
                let nsm_event =
                    log.last_event.get(&key).cloned().unwrap_or_default();
                let new_state =
                    fields.0.get("new_state").cloned().unwrap_or_default();
                log.transitions
                    .entry(key)
                    .or_default()
                    .push((nsm_event, new_state));
            }
            _ => (),
        }
    }
}

// ===== impl TraceFields =====

impl Visit for TraceFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }
}

// ===== impl NetTransport =====

impl Transport for NetTransport {
    fn send_packet(
        &self,
        packet: &Packet,
        dst: Ipv6Addr,
        ifname: &str,
        _hop_limit: u8,
    ) {
        self.outbox.borrow_mut().push_back(TxPacket {
            router: self.router.clone(),
            ifname: ifname.to_owned(),
            dst,
            packet: packet.clone(),
        });
    }
}

// ===== impl NetAddresses =====

impl AddressTable for NetAddresses {
    fn ifindex(&self, ifname: &str) -> Option<u32> {
        self.0.borrow().get(ifname).map(|iface| iface.ifindex)
    }

    fn is_operative(&self, ifname: &str) -> bool {
        self.0
            .borrow()
            .get(ifname)
            .is_some_and(|iface| iface.operative)
    }

    fn mtu(&self, ifname: &str) -> Option<u16> {
        self.0.borrow().get(ifname).map(|iface| iface.mtu)
    }

    fn linklocal(&self, ifname: &str) -> Option<Ipv6Addr> {
        self.0
            .borrow()
            .get(ifname)
            .filter(|iface| !iface.loopback)
            .map(|iface| iface.linklocal)
    }

    fn is_loopback(&self, ifname: &str) -> bool {
        self.0
            .borrow()
            .get(ifname)
            .is_some_and(|iface| iface.loopback)
    }

    fn addresses(&self, ifname: &str) -> BTreeSet<Ipv6Network> {
        self.0
            .borrow()
            .get(ifname)
            .map(|iface| iface.addresses.clone())
            .unwrap_or_default()
    }
}

// ===== impl NetRoutes =====

impl RouteSink for NetRoutes {
    fn install(&self, route: &RouteEntry) {
        self.0.borrow_mut().insert(route.prefix, route.clone());
    }

    fn uninstall(&self, prefix: &Ipv6Network) {
        self.0.borrow_mut().remove(prefix);
    }
}

// ===== helper functions =====

// Formats neighbor FSM transitions the way they're collected by `NsmLog`.
pub fn transitions(
    list: &[(nsm::Event, nsm::State)],
) -> Vec<(String, String)> {
    list.iter()
        .map(|(event, state)| (format!("{event:?}"), format!("{state:?}")))
        .collect()
}

// Returns the n-th host address of the given prefix, keeping its length.
pub fn host_addr(prefix: &str, host: u128) -> Ipv6Network {
    let prefix: Ipv6Network = prefix.parse().expect("invalid prefix");
    let addr = Ipv6Addr::from(u128::from(prefix.network()) + host);
    Ipv6Network::new(addr, prefix.prefix()).expect("invalid prefix length")
}

pub fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
