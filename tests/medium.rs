//! Wireless medium scenarios: broadcast fanout reaching only in-range nodes,
//! plus the link-quality properties exercised through
//! `World::get_link_quality`.

mod common;

use std::time::Duration;

use rpl_sim::config::PhyTransmitMode;
use rpl_sim::node::{IpAddr, MacAddr};
use rpl_sim::pdu::{self, IcmpPdu, IpSdu, RplMessage};
use rpl_sim::world::World;

use common::{test_config, RecordingHooks};

#[test]
fn broadcast_reaches_in_range_nodes_only() {
    let hooks = RecordingHooks::default();
    let mut config = test_config();
    config.phy_transmit_mode = PhyTransmitMode::Broadcast;
    let world = World::create(config, Box::new(hooks.clone())).unwrap();

    let a = world.add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0).unwrap();
    let b = world.add_node("b", MacAddr("bbbbbbbbbbbb".into()), IpAddr("fe80::b".into()), (10.0, 0.0), 1.0).unwrap();
    let c = world.add_node("c", MacAddr("cccccccccccc".into()), IpAddr("fe80::c".into()), (20.0, 0.0), 1.0).unwrap();
    let _d = world.add_node("d", MacAddr("dddddddddddd".into()), IpAddr("fe80::d".into()), (100.0, 0.0), 1.0).unwrap();

    world.start(false);
    let a_node = world.find_node(a).unwrap();
    assert!(world.wait_until(|| a_node.execute_sync(|h| h.is_alive()), Duration::from_secs(1)));

    world.send(a, IpAddr("fe80::b".into()), pdu::NEXT_HEADER_ICMP, IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis)));

    let transmission_time = world.config().transmission_time;
    assert!(world.wait_until(|| world.now() >= transmission_time, Duration::from_secs(1)));
    // Give the worker a moment past the delivery bucket to run every hook.
    std::thread::sleep(Duration::from_millis(20));
    world.stop();

    let mut received: Vec<_> = hooks.mac_received.lock().unwrap().clone();
    received.sort_by_key(|n| n.0);
    assert_eq!(received, vec![b, c], "only b and c are within no_link_dist_thresh of a; d is not, a excludes itself");
}

#[test]
fn link_quality_matches_euclidean_distance_not_the_known_buggy_y_over_y_formula() {
    let config = test_config();
    let world = World::create(config, Box::new(RecordingHooks::default())).unwrap();
    let a = world.add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0).unwrap();
    let b = world.add_node("b", MacAddr("bbbbbbbbbbbb".into()), IpAddr("fe80::b".into()), (0.0, 10.0), 1.0).unwrap();

    // A purely vertical separation would read as zero distance under the
    // reference's known copy/paste bug (`x - x` instead of `y - y` on the
    // second term); under correct Euclidean distance it's just 10.0.
    let quality = world.get_link_quality(a, b).unwrap();
    let expected = 1.0 * ((30.0 - 10.0) / 30.0);
    assert!((quality - expected).abs() < 1e-5, "quality={quality}, expected={expected}");
}

#[test]
fn get_link_quality_is_none_for_unknown_node() {
    let world = World::create(test_config(), Box::new(RecordingHooks::default())).unwrap();
    let a = world.add_node("a", MacAddr("aaaaaaaaaaaa".into()), IpAddr("fe80::a".into()), (0.0, 0.0), 1.0).unwrap();
    assert!(world.get_link_quality(a, rpl_sim::node::NodeId(9999)).is_none());
}
