//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::net::Ipv4Addr;

use common::{BACKBONE, Network, transitions};
use const_addrs::ip4;
use holo_ospfv3::area::AreaType;
use holo_ospfv3::debug::SeqNoMismatchReason;
use holo_ospfv3::interface::ism;
use holo_ospfv3::neighbor::nsm;
use holo_ospfv3::packet::lsa::{LsaBody, LsaKey, LsaType};
use holo_ospfv3::packet::{
    DbDesc, DbDescFlags, Hello, LsRequest, Options, Packet, PacketType,
};
use maplit::btreeset;

const RT1: Ipv4Addr = ip4!("1.1.1.1");
const RT2: Ipv4Addr = ip4!("2.2.2.2");
const RT3: Ipv4Addr = ip4!("3.3.3.3");

fn p2p_pair() -> Network {
    let mut net = Network::new();
    net.add_router("rt1", RT1, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt2", RT2, &[(BACKBONE, AreaType::Normal)]);
    net.p2p_link(
        ("rt1", "eth-rt2"),
        ("rt2", "eth-rt1"),
        BACKBONE,
        10,
        "2001:db8:12::/64",
    );
    net.loopback("rt2", "lo", BACKBONE, "2001:db8::2");
    net
}

// Test description:
//
// Two routers connected through a point-to-point link form a full
// adjacency.
//
// Input:
//  * Both routers are started and the network runs for one minute
// Output:
//  * The router with the lowest Router ID becomes the slave and goes through
//    the Loading state, since its requests are still outstanding when the
//    exchange completes
//  * The master reaches Full straight from Exchange
//  * The Database Exchange lists are empty
#[test]
fn p2p_adjacency_full() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);

    assert_eq!(
        net.nsm_transitions("rt1", RT2),
        transitions(&[
            (nsm::Event::HelloRcvd, nsm::State::Init),
            (nsm::Event::TwoWayRcvd, nsm::State::ExStart),
            (nsm::Event::NegotiationDone, nsm::State::Exchange),
            (nsm::Event::ExchangeDone, nsm::State::Loading),
            (nsm::Event::LoadingDone, nsm::State::Full),
        ])
    );
    assert_eq!(
        net.nsm_transitions("rt2", RT1),
        transitions(&[
            (nsm::Event::HelloRcvd, nsm::State::Init),
            (nsm::Event::TwoWayRcvd, nsm::State::ExStart),
            (nsm::Event::NegotiationDone, nsm::State::Exchange),
            (nsm::Event::ExchangeDone, nsm::State::Full),
        ])
    );

    for (router, ifname, nbr_id) in
        [("rt1", "eth-rt2", RT2), ("rt2", "eth-rt1", RT1)]
    {
        let rt = net.router(router);
        assert_eq!(rt.ism_state(ifname), ism::State::PointToPoint);
        assert_eq!(rt.nbr_state(ifname, nbr_id), Some(nsm::State::Full));

        let trace = &rt.nbr_trace[&(ifname.to_owned(), nbr_id)];
        assert!(trace.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(trace.last(), Some(&nsm::State::Full));

        let nbr = rt.instance.neighbor(ifname, nbr_id).unwrap();
        assert!(nbr.lists.db_summary.is_empty());
        assert!(nbr.lists.ls_request.is_empty());
        assert!(nbr.lists.ls_rxmt.is_empty());
    }
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A neighbor stays in the Loading state while there are outstanding LS
// Requests and becomes Full once they're all answered.
//
// Input:
//  * Two routers, the second one ignoring LS Requests at first
//  * LS Requests are accepted again after the adjacency got stuck
// Output:
//  * The first router holds its neighbor in Loading with pending requests
//  * The request is retransmitted and answered, generating LoadingDone
#[test]
fn p2p_adjacency_loading() {
    let mut net = p2p_pair();
    net.drop_rx("rt2", "eth-rt1", &[PacketType::LsRequest]);
    net.start();

    let rt1 = net.router("rt1");
    assert_eq!(rt1.nbr_state("eth-rt2", RT2), Some(nsm::State::Loading));
    let nbr = rt1.instance.neighbor("eth-rt2", RT2).unwrap();
    assert!(!nbr.lists.ls_request_pending.is_empty());
    assert_eq!(
        net.router("rt2").nbr_state("eth-rt1", RT1),
        Some(nsm::State::Full)
    );

    net.accept_rx("rt2", "eth-rt1");
    net.run_secs(10);

    let rt1 = net.router("rt1");
    assert_eq!(rt1.nbr_state("eth-rt2", RT2), Some(nsm::State::Full));
    let nbr = rt1.instance.neighbor("eth-rt2", RT2).unwrap();
    assert!(nbr.lists.ls_request_pending.is_empty());
    assert_eq!(
        net.nsm_transitions("rt1", RT2).last(),
        transitions(&[(nsm::Event::LoadingDone, nsm::State::Full)]).first()
    );
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A request for an LSA that isn't in the database restarts the database
// exchange.
//
// Input:
//  * Full adjacency between two routers
//  * The first router receives an LS Request for an unknown LSA
// Output:
//  * The BadLsReq event moves the neighbor back to ExStart
//  * The adjacency is Full again shortly after
#[test]
fn p2p_adjacency_bad_lsreq() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);

    let hdr = net.packet_hdr("rt2", PacketType::LsRequest, BACKBONE);
    let key =
        LsaKey::new(LsaType::ROUTER, ip4!("9.9.9.9"), Ipv4Addr::UNSPECIFIED);
    let packet = Packet::LsRequest(LsRequest {
        hdr,
        entries: vec![key],
    });
    net.drop_rx("rt2", "eth-rt1", &[PacketType::DbDesc]);
    net.inject_packet(("rt1", "eth-rt2"), ("rt2", "eth-rt1"), packet);

    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::ExStart)
    );
    assert_eq!(
        net.nsm_transitions("rt1", RT2).last(),
        transitions(&[(nsm::Event::BadLsReq, nsm::State::ExStart)]).first()
    );
    let nbr = net.router("rt1").instance.neighbor("eth-rt2", RT2).unwrap();
    assert!(nbr.lists.ls_rxmt.is_empty());
    assert!(nbr.lists.db_summary.is_empty());

    net.accept_rx("rt2", "eth-rt1");
    net.run_secs(60);
    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A Database Description packet received from a Full neighbor that isn't a
// duplicate of the last one restarts the database exchange.
//
// Input:
//  * Full adjacency between two routers
//  * The first router receives a Database Description packet carrying an
//    unexpected sequence number and flags
// Output:
//  * The SeqNumberMismatch event moves the neighbor back to ExStart
//  * The adjacency is Full again shortly after
#[test]
fn p2p_adjacency_seqno_mismatch() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);

    let hdr = net.packet_hdr("rt2", PacketType::DbDesc, BACKBONE);
    let packet = Packet::DbDesc(DbDesc {
        hdr,
        options: Options::V6 | Options::E | Options::R,
        mtu: 1500,
        dd_flags: DbDescFlags::MS,
        dd_seq_no: 0xdead,
        lsa_hdrs: vec![],
    });
    net.drop_rx("rt2", "eth-rt1", &[PacketType::DbDesc]);
    net.inject_packet(("rt1", "eth-rt2"), ("rt2", "eth-rt1"), packet);

    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::ExStart)
    );
    let reason = SeqNoMismatchReason::UnexpectedDbDesc;
    assert_eq!(
        net.nsm_transitions("rt1", RT2).last(),
        transitions(&[(
            nsm::Event::SeqNoMismatch(reason),
            nsm::State::ExStart
        )])
        .first()
    );

    net.accept_rx("rt2", "eth-rt1");
    net.run_secs(60);
    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A Hello that no longer lists the local router moves the neighbor back to
// Init and tears the adjacency down.
//
// Input:
//  * Full adjacency between two routers
//  * The first router receives a Hello from its neighbor without its own
//    Router ID
// Output:
//  * The OneWayRcvd event moves the neighbor to Init
//  * The next regular Hello brings the adjacency back to Full
#[test]
fn p2p_adjacency_one_way() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);

    let hdr = net.packet_hdr("rt2", PacketType::Hello, BACKBONE);
    let packet = Packet::Hello(Hello {
        hdr,
        iface_id: net.router("rt2").sys_iface("eth-rt1").ifindex,
        priority: 1,
        options: Options::V6 | Options::E | Options::R,
        hello_interval: 10,
        dead_interval: 40,
        dr: None,
        bdr: None,
        neighbors: Default::default(),
    });
    net.inject_packet(("rt1", "eth-rt2"), ("rt2", "eth-rt1"), packet);

    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Init)
    );
    assert_eq!(
        net.nsm_transitions("rt1", RT2).last(),
        transitions(&[(nsm::Event::OneWayRcvd, nsm::State::Init)]).first()
    );
    let nbr = net.router("rt1").instance.neighbor("eth-rt2", RT2).unwrap();
    assert!(nbr.lists.ls_request.is_empty());
    assert!(nbr.lists.ls_rxmt.is_empty());

    net.run_secs(60);
    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// Three routers attached to the same broadcast segment elect a DR and a
// BDR once the wait timer expires.
//
// Input:
//  * Three routers with the same priority on a broadcast segment
// Output:
//  * The router with the highest Router ID is the DR
//  * The router with the second highest Router ID is the BDR
//  * The DR originates a Network-LSA listing all attached routers
#[test]
fn broadcast_dr_election() {
    let mut net = Network::new();
    net.add_router("rt1", RT1, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt2", RT2, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt3", RT3, &[(BACKBONE, AreaType::Normal)]);
    net.broadcast_link(
        &[("rt1", "eth0", 1), ("rt2", "eth0", 1), ("rt3", "eth0", 1)],
        BACKBONE,
        10,
        "2001:db8:123::/64",
    );
    net.start();
    net.run_secs(60);

    assert_eq!(net.router("rt1").ism_state("eth0"), ism::State::DrOther);
    assert_eq!(net.router("rt2").ism_state("eth0"), ism::State::Backup);
    assert_eq!(net.router("rt3").ism_state("eth0"), ism::State::Dr);
    for rt in net.routers.values() {
        let iface = rt.instance.interface("eth0").unwrap();
        assert_eq!(iface.state.dr, Some(RT3));
        assert_eq!(iface.state.bdr, Some(RT2));
    }

    // The DR and the BDR are fully adjacent with everyone else, while the
    // DROthers stay in 2-Way between themselves.
    let rt1 = net.router("rt1");
    assert_eq!(rt1.nbr_state("eth0", RT2), Some(nsm::State::Full));
    assert_eq!(rt1.nbr_state("eth0", RT3), Some(nsm::State::Full));
    let rt3 = net.router("rt3");
    assert_eq!(rt3.nbr_state("eth0", RT1), Some(nsm::State::Full));
    assert_eq!(rt3.nbr_state("eth0", RT2), Some(nsm::State::Full));

    let network_lsa = rt1
        .instance
        .area_lsas(BACKBONE)
        .into_iter()
        .find(|lsa| {
            lsa.hdr.lsa_type == LsaType::NETWORK && lsa.hdr.adv_rtr == RT3
        })
        .expect("missing Network-LSA");
    let LsaBody::Network(network) = &network_lsa.body else {
        panic!("unexpected LSA body");
    };
    assert_eq!(network.attached_rtrs, btreeset![RT1, RT2, RT3]);
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A router whose priority is zero never becomes DR or BDR.
//
// Input:
//  * Two routers on a broadcast segment, the one with the highest Router ID
//    configured with priority zero
// Output:
//  * The other router becomes the DR and no BDR is elected
#[test]
fn broadcast_ineligible_router() {
    let mut net = Network::new();
    net.add_router("rt1", RT1, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt2", RT2, &[(BACKBONE, AreaType::Normal)]);
    net.broadcast_link(
        &[("rt1", "eth0", 1), ("rt2", "eth0", 0)],
        BACKBONE,
        10,
        "2001:db8:12::/64",
    );
    net.start();
    net.run_secs(60);

    assert_eq!(net.router("rt1").ism_state("eth0"), ism::State::Dr);
    assert_eq!(net.router("rt2").ism_state("eth0"), ism::State::DrOther);
    let iface = net.router("rt2").instance.interface("eth0").unwrap();
    assert_eq!(iface.state.dr, Some(RT1));
    assert_eq!(iface.state.bdr, None);
    assert_eq!(
        net.router("rt2").nbr_state("eth0", RT1),
        Some(nsm::State::Full)
    );
}

// Test description:
//
// A neighbor that stops sending Hellos is removed once the dead interval
// expires, and the routes learned through it are withdrawn.
//
// Input:
//  * Full adjacency between two routers
//  * The interface of the second router goes down
// Output:
//  * The second router removes its neighbor immediately
//  * The first router removes its neighbor after the dead interval
#[test]
fn p2p_neighbor_dead_interval() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);
    assert!(net.router("rt1").route("2001:db8::2/128").is_some());

    net.set_operative("rt2", "eth-rt1", false);
    assert_eq!(net.router("rt2").ism_state("eth-rt1"), ism::State::Down);
    assert_eq!(net.router("rt2").nbr_state("eth-rt1", RT1), None);

    net.run_secs(20);
    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );

    net.run_secs(30);
    assert_eq!(net.router("rt1").nbr_state("eth-rt2", RT2), None);
    assert!(net.router("rt1").route("2001:db8::2/128").is_none());
}

// Test description:
//
// An adjacency is reestablished when a failed interface comes back up.
//
// Input:
//  * Full adjacency between two routers
//  * The interface of the second router goes down and later comes back
// Output:
//  * Both neighbors are Full again
#[test]
fn p2p_adjacency_recovery() {
    let mut net = p2p_pair();
    net.start();
    net.run_secs(60);

    net.set_operative("rt2", "eth-rt1", false);
    net.run_secs(60);
    net.set_operative("rt2", "eth-rt1", true);
    net.run_secs(60);

    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );
    assert_eq!(
        net.router("rt2").nbr_state("eth-rt1", RT1),
        Some(nsm::State::Full)
    );
    assert!(net.router("rt1").route("2001:db8::2/128").is_some());
    assert!(net.area_synchronized(BACKBONE));
}
