//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use common::{BACKBONE, Network};
use const_addrs::ip4;
use holo_ospfv3::area::AreaType;
use holo_ospfv3::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_SEQ_NO};
use holo_ospfv3::neighbor::nsm;
use holo_ospfv3::packet::lsa::{
    Lsa, LsaBody, LsaKey, LsaRouter, LsaRouterFlags, LsaType,
};
use holo_ospfv3::packet::{Options, PacketType};

const RT1: Ipv4Addr = ip4!("1.1.1.1");
const RT2: Ipv4Addr = ip4!("2.2.2.2");
const RT3: Ipv4Addr = ip4!("3.3.3.3");
const RT4: Ipv4Addr = ip4!("4.4.4.4");

// Builds a line of routers connected through point-to-point links.
fn line(len: usize) -> Network {
    let ids = [RT1, RT2, RT3, RT4];
    let mut net = Network::new();
    for (i, router_id) in ids.iter().take(len).enumerate() {
        let name = format!("rt{}", i + 1);
        net.add_router(&name, *router_id, &[(BACKBONE, AreaType::Normal)]);
    }
    for i in 1..len {
        let (a, b) = (i, i + 1);
        let rt_a = format!("rt{a}");
        let rt_b = format!("rt{b}");
        let if_a = format!("eth-rt{b}");
        let if_b = format!("eth-rt{a}");
        net.p2p_link(
            (&rt_a, &if_a),
            (&rt_b, &if_b),
            BACKBONE,
            10,
            &format!("2001:db8:{a}{b}::/64"),
        );
    }
    net
}

fn router_lsa_key(router_id: Ipv4Addr) -> LsaKey {
    LsaKey::new(LsaType::ROUTER, router_id, Ipv4Addr::UNSPECIFIED)
}

// Test description:
//
// Every router of an area ends up with the same set of LSA instances, and
// no LSDB holds two instances of the same LSA.
//
// Input:
//  * Line of four routers
// Output:
//  * Identical (key, sequence number) sets across all routers
//  * One Router-LSA per router
#[test]
fn lsdb_synchronization() {
    let mut net = line(4);
    net.start();
    net.run_secs(60);

    for rt in net.routers.values() {
        let lsas = rt.instance.area_lsas(BACKBONE);
        let keys = lsas
            .iter()
            .map(|lsa| lsa.hdr.key())
            .collect::<BTreeSet<_>>();
        assert_eq!(keys.len(), lsas.len());

        let router_lsas = keys
            .iter()
            .filter(|key| key.lsa_type == LsaType::ROUTER)
            .map(|key| key.adv_rtr)
            .collect::<Vec<_>>();
        assert_eq!(router_lsas, vec![RT1, RT2, RT3, RT4]);
    }
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// Self-originated LSAs are refreshed every LSRefreshTime with an incremented
// sequence number and never expire.
//
// Input:
//  * Two routers running for more than one hour
// Output:
//  * The Router-LSA of the first router is refreshed once per cycle
//  * The neighbor always holds the latest instance
#[test]
fn lsa_refresh() {
    let mut net = line(2);
    net.start();
    net.run_secs(60);

    let key = router_lsa_key(RT1);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    let seq_no = lsa.hdr.seq_no;
    let age = lsa.hdr.age as u64;
    assert!(age < 60);

    net.run_secs(1800 - age - 5);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no);

    net.run_secs(10);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no.wrapping_add(1));
    assert!(lsa.hdr.age < 10);

    net.run_secs(1800);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no.wrapping_add(2));
    assert!(!lsa.hdr.is_maxage());

    let lsa = net.router("rt2").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no.wrapping_add(2));
    assert_eq!(
        net.router("rt1").nbr_state("eth-rt2", RT2),
        Some(nsm::State::Full)
    );
}

// Test description:
//
// Self-originated LSAs are refreshed on the age tick that makes them reach
// LSRefreshTime, not one tick later.
//
// Input:
//  * Two routers with a stable Router-LSA
// Output:
//  * The LSA keeps its sequence number at age LSRefreshTime - 1
//  * The next tick originates a new instance
#[test]
fn lsa_refresh_threshold() {
    let mut net = line(2);
    net.start();
    net.run_secs(60);

    let key = router_lsa_key(RT1);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    let seq_no = lsa.hdr.seq_no;
    let age = lsa.hdr.age as u64;

    net.run_secs(1800 - age - 1);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no);
    assert_eq!(lsa.hdr.age, 1799);

    net.run_secs(1);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, seq_no.wrapping_add(1));
    assert_eq!(lsa.hdr.age, 0);
}

// Test description:
//
// A router receiving an instance of its own LSA that is newer than the
// database copy originates an instance with a higher sequence number. When
// the sequence number space is exhausted, the LSA is flushed and then
// originated again with the initial sequence number.
//
// Input:
//  * Full adjacency between two routers
//  * The first router receives its own Router-LSA with the maximum
//    sequence number
// Output:
//  * The LSA is flushed with the maximum sequence number
//  * A new instance with the initial sequence number reaches both routers
#[test]
fn lsa_seqno_wrap() {
    let mut net = line(2);
    net.start();
    net.run_secs(60);

    let key = router_lsa_key(RT1);
    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    let lsa = Lsa::new(
        1,
        lsa.hdr.lsa_id,
        lsa.hdr.adv_rtr,
        LSA_MAX_SEQ_NO,
        lsa.body.clone(),
    );
    net.inject_lsupd(("rt1", "eth-rt2"), ("rt2", "eth-rt1"), BACKBONE, vec![
        lsa,
    ]);

    let lsa = net.router("rt1").lsa(BACKBONE, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_MAX_SEQ_NO);
    assert!(lsa.hdr.is_maxage());

    net.run_secs(30);
    for rt in net.routers.values() {
        let lsa = rt.lsa(BACKBONE, &key).unwrap();
        assert!(!lsa.hdr.is_maxage());
        assert!(
            (LSA_INIT_SEQ_NO..LSA_INIT_SEQ_NO + 3).contains(&lsa.hdr.seq_no)
        );
    }
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// A change in the local topology is flooded to every router of the area.
//
// Input:
//  * Line of four routers
//  * The cost of an interface of the first router changes
// Output:
//  * All routers hold the new instance of the Router-LSA of the first router
//  * All routers recompute the path to the far end of the line
#[test]
fn lsa_flooding() {
    let mut net = line(4);
    net.start();
    net.run_secs(60);

    let key = router_lsa_key(RT1);
    let old_seq_no = net.router("rt1").lsa(BACKBONE, &key).unwrap().hdr.seq_no;

    net.router_mut("rt1")
        .instance
        .set_interface_cost("eth-rt2", 100)
        .unwrap();
    net.run_secs(10);

    let new_seq_no = net.router("rt1").lsa(BACKBONE, &key).unwrap().hdr.seq_no;
    assert!(new_seq_no > old_seq_no);
    for rt in net.routers.values() {
        let lsa = rt.lsa(BACKBONE, &key).unwrap();
        assert_eq!(lsa.hdr.seq_no, new_seq_no);
    }
    assert!(net.area_synchronized(BACKBONE));

    let route = net.router("rt1").route("2001:db8:34::/64").unwrap();
    assert_eq!(route.metric, 100 + 10 + 10);
}

// Test description:
//
// An LSA reaching MaxAge is flushed from the routing domain.
//
// Input:
//  * Line of three routers
//  * The second router receives a Router-LSA of a router that isn't part
//    of the topology, about to expire
// Output:
//  * The LSA reaches MaxAge on the second router
//  * The LSA is removed from every LSDB shortly after
#[test]
fn lsa_maxage_flush() {
    let mut net = line(3);
    net.start();
    net.run_secs(60);

    let phantom = ip4!("9.9.9.9");
    let body = LsaBody::Router(LsaRouter::new(
        LsaRouterFlags::empty(),
        Options::V6 | Options::E | Options::R,
        vec![],
    ));
    let lsa =
        Lsa::new(3599, Ipv4Addr::UNSPECIFIED, phantom, LSA_INIT_SEQ_NO, body);
    net.inject_lsupd(("rt2", "eth-rt1"), ("rt1", "eth-rt2"), BACKBONE, vec![
        lsa,
    ]);

    let key = router_lsa_key(phantom);
    assert!(net.router("rt2").lsa(BACKBONE, &key).is_some());

    net.run_secs(1);
    let lsa = net.router("rt2").lsa(BACKBONE, &key).unwrap();
    assert!(lsa.hdr.is_maxage());

    net.run_secs(10);
    for rt in net.routers.values() {
        assert!(rt.lsa(BACKBONE, &key).is_none());
    }
    assert!(net.area_synchronized(BACKBONE));
}

// Test description:
//
// LSAs retransmitted to a neighbor that doesn't acknowledge them carry the
// current age of the database copy rather than the age they had when first
// flooded.
//
// Input:
//  * Line of three routers, the third one discarding every packet received
//    from the second
//  * The second router receives a new LSA from the first router
// Output:
//  * The LSA is retransmitted to the third router every RxmtInterval
//  * Every retransmission carries a larger age than the previous one
#[test]
fn lsa_rxmt_current_age() {
    let mut net = line(3);
    net.start();
    net.run_secs(60);

    net.drop_rx("rt3", "eth-rt2", &[
        PacketType::Hello,
        PacketType::DbDesc,
        PacketType::LsRequest,
        PacketType::LsUpdate,
        PacketType::LsAck,
    ]);
    let phantom = ip4!("9.9.9.9");
    let body = LsaBody::Router(LsaRouter::new(
        LsaRouterFlags::empty(),
        Options::V6 | Options::E | Options::R,
        vec![],
    ));
    let lsa =
        Lsa::new(100, Ipv4Addr::UNSPECIFIED, phantom, LSA_INIT_SEQ_NO, body);
    net.inject_lsupd(("rt2", "eth-rt1"), ("rt1", "eth-rt2"), BACKBONE, vec![
        lsa,
    ]);
    net.run_secs(20);

    let key = router_lsa_key(phantom);
    let ages = net
        .sent_lsas("rt2", "eth-rt3", &key)
        .into_iter()
        .map(|(_, lsa)| lsa.hdr.age)
        .collect::<Vec<_>>();
    assert!(ages.len() >= 4, "{ages:?}");
    assert_eq!(ages[0], 101);
    assert!(ages.windows(2).all(|pair| pair[0] < pair[1]), "{ages:?}");
    assert!(ages[ages.len() - 1] >= ages[0] + 15, "{ages:?}");

    // The copy awaiting acknowledgment follows the database copy as well.
    let nbr = net.router("rt2").instance.neighbor("eth-rt3", RT3).unwrap();
    let rxmt_age = nbr.lists.ls_rxmt[&key].hdr.age;
    let db_age = net.router("rt2").lsa(BACKBONE, &key).unwrap().hdr.age;
    assert!(rxmt_age >= 115 && rxmt_age <= db_age);
}

// Test description:
//
// The Intra-Area-Prefix-LSAs referencing a Network-LSA are identified by the
// Interface ID of the transit link, so losing one transit link doesn't
// renumber or reoriginate the LSAs of the others.
//
// Input:
//  * First router elected DR on two broadcast segments, each one shared
//    with another router
//  * The first broadcast interface of the first router goes down
// Output:
//  * Before the failure, the LSAs use the Interface IDs of both segments
//  * The LSA of the failed segment is flushed
//  * The LSA of the other segment keeps its ID and sequence number
#[test]
fn intra_area_prefix_stable_ids() {
    let mut net = Network::new();
    net.add_router("rt1", RT1, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt2", RT2, &[(BACKBONE, AreaType::Normal)]);
    net.add_router("rt3", RT3, &[(BACKBONE, AreaType::Normal)]);
    net.broadcast_link(
        &[("rt1", "eth0", 2), ("rt2", "eth0", 1)],
        BACKBONE,
        10,
        "2001:db8:12::/64",
    );
    net.broadcast_link(
        &[("rt1", "eth1", 2), ("rt3", "eth0", 1)],
        BACKBONE,
        10,
        "2001:db8:13::/64",
    );
    net.start();
    net.run_secs(60);

    let iap_key = |ifname: &str| {
        let ifindex = net.router("rt1").sys_iface(ifname).ifindex;
        LsaKey::new(LsaType::INTRA_AREA_PREFIX, RT1, Ipv4Addr::from(ifindex))
    };
    let eth0_key = iap_key("eth0");
    let eth1_key = iap_key("eth1");
    let rt1 = net.router("rt1");
    assert!(rt1.lsa(BACKBONE, &eth0_key).is_some());
    let old_lsa = rt1.lsa(BACKBONE, &eth1_key).unwrap();
    let LsaBody::IntraAreaPrefix(iap) = &old_lsa.body else {
        panic!("unexpected LSA body");
    };
    assert_eq!(iap.ref_lsa_type, LsaType::NETWORK);
    assert_eq!(iap.ref_lsa_id, eth1_key.lsa_id);

    net.set_operative("rt1", "eth0", false);
    net.run_secs(10);

    let rt1 = net.router("rt1");
    assert!(
        rt1.lsa(BACKBONE, &eth0_key)
            .is_none_or(|lsa| lsa.hdr.is_maxage())
    );
    let new_lsa = rt1.lsa(BACKBONE, &eth1_key).unwrap();
    assert_eq!(new_lsa.hdr.seq_no, old_lsa.hdr.seq_no);
    assert_eq!(new_lsa.body, old_lsa.body);
    assert_eq!(
        net.router("rt3").lsa(BACKBONE, &eth1_key).unwrap().hdr.seq_no,
        old_lsa.hdr.seq_no
    );
}
