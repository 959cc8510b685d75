//! Integration scenarios across the full iosim stack
//!
//! These scenarios exercise:
//! - iosim-core (packets, drop reasons, event log)
//! - iosim-routing (routing table, policy index)
//! - iosim-storage (snapshot format, snapshot store and index)
//! - the device, engine and network layers of this crate

use std::net::Ipv4Addr;

use iosim_core::{DropReason, EventKind, Severity};
use iosim_routing::Policy;
use tempfile::TempDir;

use crate::config::SimConfig;
use crate::device::DeviceKind;
use crate::network::Network;
use crate::scenarios::{self, build_lab};

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn config(temp: &TempDir) -> SimConfig {
    SimConfig::default().with_snapshot_dir(temp.path().join("snapshots"))
}

fn lab(temp: &TempDir) -> Network {
    let mut net = Network::new(config(temp)).unwrap();
    build_lab(&mut net).unwrap();
    net
}

/// The lab topology is fully wired and addressed
#[test]
fn test_lab_topology() {
    let temp = TempDir::new().unwrap();
    let net = lab(&temp);

    assert_eq!(net.device_names(), vec!["PC1", "R1", "R2", "PC2"]);
    assert_eq!(net.connections().len(), 3);
    let r1 = net.device("R1").unwrap();
    assert!(r1.interfaces().iter().all(|i| i.is_usable()));
    assert_eq!(r1.routing_table().len(), 1);
    assert_eq!(net.network_stats().devices_online, 4);
}

/// A TTL=1 packet whose destination has a route is sent once and then
/// expires in the same tick
#[test]
fn test_ttl_one_expires_after_single_transmit() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);

    net.send_packet(ip("192.168.1.10"), ip("192.168.2.10"), "short lived", Some(1))
        .unwrap();
    let report = net.tick();

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.device, "PC1");
    assert_eq!(outcome.transmission.as_ref().unwrap().next_hop, ip("192.168.1.1"));
    assert_eq!(outcome.drop, Some(DropReason::TtlExpired));

    let pc1 = net.device("PC1").unwrap().counters();
    assert_eq!((pc1.sent, pc1.dropped), (1, 1));

    let expired = net.events().by_kind(EventKind::Drop(DropReason::TtlExpired));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].severity, Severity::Info);
    assert_eq!(expired[0].tick, 1);
}

/// Longest-prefix policy match decides between a block rule and a TTL floor
#[test]
fn test_policy_longest_prefix_in_pipeline() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);
    {
        let r1 = net.device_mut("R1").unwrap();
        r1.add_route(ip("0.0.0.0"), ip("0.0.0.0"), ip("10.0.0.2"), 100);
        r1.set_policy(ip("10.0.0.0"), ip("255.0.0.0"), Policy::Block);
        r1.set_policy(ip("10.1.0.0"), ip("255.255.0.0"), Policy::TtlMin(3));
        let (prefix, policy) = r1.policies().search_longest_prefix(ip("10.1.5.5")).unwrap();
        assert_eq!((prefix, policy), ("10.1.0.0/16", Policy::TtlMin(3)));
    }

    let src = ip("192.168.1.1");
    net.send_packet(src, ip("10.1.5.5"), "low", Some(2)).unwrap();
    net.send_packet(src, ip("10.1.5.5"), "ok", Some(5)).unwrap();
    net.send_packet(src, ip("10.2.0.0"), "blocked", None).unwrap();

    let report = net.tick();
    assert_eq!(report.drops(DropReason::PolicyViolation), 2);
    assert_eq!(report.transmitted(), 1);
    assert_eq!(net.events().by_severity(Severity::Warning).len(), 2);
}

/// Taking a device offline freezes its queues until it comes back
#[test]
fn test_offline_device_resumes() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);

    net.send_packet(ip("192.168.1.10"), ip("192.168.2.10"), "later", None)
        .unwrap();
    net.set_device_status("PC1", false).unwrap();
    let report = net.tick();
    assert!(report.outcomes.is_empty());
    assert_eq!(report.devices_skipped, 1);

    net.set_device_status("PC1", true).unwrap();
    let report = net.tick();
    assert_eq!(report.transmitted(), 1);
    assert_eq!(report.outcomes[0].packet.ttl, 63);
}

/// The resolution cache is learned once per next hop
#[test]
fn test_resolution_cache_hits() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);

    for _ in 0..3 {
        net.send_packet(ip("192.168.1.10"), ip("192.168.2.10"), "ping", None)
            .unwrap();
    }
    let report = net.tick();
    let hits: Vec<bool> = report
        .outcomes
        .iter()
        .map(|o| o.transmission.as_ref().unwrap().cache_hit)
        .collect();
    assert_eq!(hits, vec![false, true, true]);
    assert_eq!(net.device("PC1").unwrap().resolution_cache().len(), 1);
}

/// Unplugging a link turns forwarding into NoRouteToHost
#[test]
fn test_disconnect_removes_egress() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);

    assert!(net.disconnect("PC1", "eth0", "R1", "g0/0").unwrap());
    net.send_packet(ip("192.168.1.10"), ip("192.168.2.10"), "lost", None)
        .unwrap();
    let report = net.tick();
    assert_eq!(report.drops(DropReason::NoRouteToHost), 1);
}

/// Snapshots round-trip the topology through the filesystem
#[test]
fn test_snapshot_roundtrip_through_store() {
    let temp = TempDir::new().unwrap();
    let mut net = lab(&temp);
    let baseline = net.to_config();

    for i in 0..6 {
        net.save_snapshot(Some(&format!("lab_{i}"))).unwrap();
    }
    let stats = net.snapshot_store().index_stats();
    assert_eq!(stats.order, 4);
    assert!(stats.splits >= 1);

    net.remove_device("R2").unwrap();
    net.add_device("FW1", DeviceKind::Firewall).unwrap();
    net.load_snapshot("lab_3").unwrap();
    assert_eq!(net.to_config(), baseline);

    let reopened = Network::new(config(&temp)).unwrap();
    let keys: Vec<&str> = reopened.snapshots().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["lab_0", "lab_1", "lab_2", "lab_3", "lab_4", "lab_5"]);
}

/// Scenario drivers complete and leave consistent state behind
#[test]
fn test_scenarios_run() {
    let temp = TempDir::new().unwrap();

    let net = scenarios::run_ttl_expiry_scenario(config(&temp)).unwrap();
    assert_eq!(net.events().by_kind(EventKind::Drop(DropReason::TtlExpired)).len(), 1);

    let net = scenarios::run_policies_scenario(config(&temp)).unwrap();
    assert_eq!(net.events().by_kind(EventKind::Drop(DropReason::PolicyViolation)).len(), 2);

    let net = scenarios::run_demo_scenario(config(&temp)).unwrap();
    let stats = net.network_stats();
    assert_eq!(stats.total_packets_sent, 3);
    assert_eq!(stats.total_packets_dropped, 1);
    assert_eq!(stats.queued_packets, 0);

    let net = scenarios::run_snapshots_scenario(config(&temp), &temp.path().join("snaps")).unwrap();
    assert_eq!(net.device_names().len(), 4);
    assert_eq!(net.snapshots().len(), 2);
}

/// Seeded random workloads leave every structure consistent
#[test]
fn test_structures_scenario() {
    let report = scenarios::run_structures_scenario(500, 5, 7).unwrap();
    assert!(report.routes > 0 && report.routes <= 500);
    assert_eq!(report.snapshots.order, 5);
    assert!(report.snapshots.splits > 0);
    assert!(report.snapshots.merges > 0);
    assert_eq!(report.routing.nodes, report.routes);

    let again = scenarios::run_structures_scenario(500, 5, 7).unwrap();
    assert_eq!(again.routes, report.routes);
    assert_eq!(again.snapshot_entries, report.snapshot_entries);
}
