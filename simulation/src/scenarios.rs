//! Pre-defined simulation scenarios
//!
//! Each scenario builds a network, drives it for a few ticks and prints what
//! happened. They double as the CLI subcommands and as integration fixtures.

use std::net::Ipv4Addr;
use std::path::Path;

use iosim_core::{DeviceError, mask_from_len};
use iosim_routing::{Policy, PolicyIndex, PolicyStats, RoutingTable, TreeStats};
use iosim_storage::{IndexStats, SnapshotIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::config::SimConfig;
use crate::device::{Device, DeviceKind};
use crate::engine::TickReport;
use crate::error::NetworkError;
use crate::network::Network;

const MASK_24: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const ANY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Build the two-router lab used by most scenarios:
///
/// ```text
/// PC1 (192.168.1.10) -- R1 -- 10.0.0.0/24 -- R2 -- PC2 (192.168.2.10)
/// ```
///
/// Interfaces are connected while shut down, then brought up.
pub fn build_lab(net: &mut Network) -> Result<(), NetworkError> {
    net.add_device("PC1", DeviceKind::Host)?;
    net.add_device("R1", DeviceKind::Router)?;
    net.add_device("R2", DeviceKind::Router)?;
    net.add_device("PC2", DeviceKind::Host)?;

    net.connect("PC1", "eth0", "R1", "g0/0")?;
    net.connect("R1", "g0/1", "R2", "g0/0")?;
    net.connect("R2", "g0/1", "PC2", "eth0")?;

    let addresses = [
        ("PC1", "eth0", Ipv4Addr::new(192, 168, 1, 10)),
        ("R1", "g0/0", Ipv4Addr::new(192, 168, 1, 1)),
        ("R1", "g0/1", Ipv4Addr::new(10, 0, 0, 1)),
        ("R2", "g0/0", Ipv4Addr::new(10, 0, 0, 2)),
        ("R2", "g0/1", Ipv4Addr::new(192, 168, 2, 1)),
        ("PC2", "eth0", Ipv4Addr::new(192, 168, 2, 10)),
    ];
    for (device, iface, ip) in addresses {
        device_mut(net, device)?.configure_interface(iface, Some(ip), Some(MASK_24), Some(true))?;
    }

    device_mut(net, "PC1")?.add_route(ANY, ANY, Ipv4Addr::new(192, 168, 1, 1), 1);
    device_mut(net, "R1")?.add_route(Ipv4Addr::new(192, 168, 2, 0), MASK_24, Ipv4Addr::new(10, 0, 0, 2), 10);
    device_mut(net, "R2")?.add_route(Ipv4Addr::new(192, 168, 1, 0), MASK_24, Ipv4Addr::new(10, 0, 0, 1), 10);
    device_mut(net, "PC2")?.add_route(ANY, ANY, Ipv4Addr::new(192, 168, 2, 1), 1);
    Ok(())
}

fn device_mut<'a>(net: &'a mut Network, name: &str) -> Result<&'a mut Device, NetworkError> {
    net.device_mut(name)
        .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()).into())
}

fn print_report(report: &TickReport) {
    println!("  {}", report.summary());
    for outcome in &report.outcomes {
        let verdict = match (&outcome.transmission, outcome.drop) {
            (Some(tx), None) => format!("sent via {} to {}", tx.interface, tx.next_hop),
            (Some(tx), Some(reason)) => format!("sent via {} then dropped ({reason})", tx.interface),
            (None, Some(reason)) => format!("dropped ({reason})"),
            (None, None) => "pending".to_string(),
        };
        println!("    [{}] {} -> {}", outcome.device, outcome.packet, verdict);
    }
}

/// Forward traffic across the lab and print statistics
pub fn run_demo_scenario(config: SimConfig) -> Result<Network, NetworkError> {
    info!("=== Running lab demo ===");
    let mut net = Network::new(config)?;
    build_lab(&mut net)?;

    println!("\n--- Topology ---");
    for device in net.devices() {
        println!("  {device}");
        for iface in device.interfaces() {
            println!("    {iface}");
        }
    }

    println!("\n--- PC1 and R1 send traffic ---");
    let pc1 = Ipv4Addr::new(192, 168, 1, 10);
    let r1 = Ipv4Addr::new(192, 168, 1, 1);
    net.send_packet(pc1, Ipv4Addr::new(192, 168, 2, 10), "hello PC2", None)?;
    net.send_packet(pc1, Ipv4Addr::new(8, 8, 8, 8), "to the internet", None)?;
    net.send_packet(r1, Ipv4Addr::new(192, 168, 2, 10), "from R1", None)?;
    net.send_packet(r1, Ipv4Addr::new(172, 16, 0, 1), "unroutable", None)?;

    for report in net.run_ticks(2) {
        print_report(&report);
    }

    println!("\n--- R1 routing table ---");
    if let Some(router) = net.device("R1") {
        print!("{}", router.routing_table().render());
        println!("  {}", router.routing_table().stats());
    }

    println!("\n--- Network statistics ---");
    let stats = net.network_stats();
    println!("  Sent: {}", stats.total_packets_sent);
    println!("  Dropped: {}", stats.total_packets_dropped);
    println!("  Top talker: {}", stats.top_talker.as_deref().unwrap_or("-"));
    println!("  {}", net.state_summary());
    Ok(net)
}

/// A TTL=1 packet is transmitted once and expires in the same tick
pub fn run_ttl_expiry_scenario(config: SimConfig) -> Result<Network, NetworkError> {
    info!("=== Running TTL expiry scenario ===");
    let mut net = Network::new(config)?;
    build_lab(&mut net)?;

    let pc1 = Ipv4Addr::new(192, 168, 1, 10);
    let pc2 = Ipv4Addr::new(192, 168, 2, 10);
    net.send_packet(pc1, pc2, "short lived", Some(1))?;
    net.send_packet(pc1, pc2, "long lived", Some(2))?;

    print_report(&net.tick());

    println!("\n--- Event log ---");
    for event in net.events().iter() {
        println!("  {event}");
    }
    Ok(net)
}

/// Prefix policies on R1 with longest-prefix match
pub fn run_policies_scenario(config: SimConfig) -> Result<Network, NetworkError> {
    info!("=== Running policy scenario ===");
    let mut net = Network::new(config)?;
    build_lab(&mut net)?;

    let r1 = device_mut(&mut net, "R1")?;
    r1.add_route(ANY, ANY, Ipv4Addr::new(10, 0, 0, 2), 100);
    r1.set_policy(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0), Policy::Block);
    r1.set_policy(Ipv4Addr::new(10, 1, 0, 0), Ipv4Addr::new(255, 255, 0, 0), Policy::TtlMin(3));

    println!("\n--- R1 policies ---");
    print!("{}", r1.policies().render());

    let src = Ipv4Addr::new(192, 168, 1, 1);
    net.send_packet(src, Ipv4Addr::new(10, 1, 5, 5), "ttl too low", Some(2))?;
    net.send_packet(src, Ipv4Addr::new(10, 1, 5, 5), "ttl ok", Some(5))?;
    net.send_packet(src, Ipv4Addr::new(10, 2, 0, 0), "blocked", None)?;
    net.send_packet(src, Ipv4Addr::new(192, 168, 2, 10), "unaffected", None)?;

    print_report(&net.tick());

    println!("\n--- Event counts ---");
    let counts = net.events().counts();
    for (kind, count) in &counts.by_kind {
        println!("  {kind}: {count}");
    }
    Ok(net)
}

/// Statistics of the structures exercised by [`run_structures_scenario`]
#[derive(Debug, Clone, Serialize)]
pub struct StructuresReport {
    pub routing: TreeStats,
    pub routes: usize,
    pub policies: PolicyStats,
    pub snapshots: IndexStats,
    pub snapshot_entries: usize,
}

/// Drive each structure with seeded random inserts and deletes
///
/// Every structure is checked for structural consistency at the end.
pub fn run_structures_scenario(count: usize, order: usize, seed: u64) -> Result<StructuresReport, NetworkError> {
    info!(count, order, seed, "=== Running structures scenario ===");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = RoutingTable::new();
    let mut policies = PolicyIndex::new();
    let mut index: SnapshotIndex<u32, String> = SnapshotIndex::new(order)?;

    let mut prefixes = Vec::with_capacity(count);
    for i in 0..count {
        let prefix = Ipv4Addr::from(rng.random::<u32>());
        let mask = mask_from_len(rng.random_range(8..=32))?;
        table.add_route(prefix, mask, Ipv4Addr::new(10, 0, 0, 1), rng.random_range(1..=100));

        let policy = if rng.random_bool(0.5) {
            Policy::Block
        } else {
            Policy::TtlMin(rng.random_range(1..=64))
        };
        policies.insert(prefix, mask, policy);
        index.insert(rng.random(), format!("snapshots/snap_{i}.cfg"));
        prefixes.push((prefix, mask));
    }

    for (prefix, mask) in &prefixes {
        if rng.random_bool(0.5) {
            table.remove_route(*prefix, *mask);
            policies.delete(*prefix, *mask);
        }
    }
    let keys: Vec<u32> = index.all_entries().into_iter().map(|(k, _)| *k).collect();
    for key in keys {
        if rng.random_bool(0.5) {
            index.delete(&key);
        }
    }

    table.check_invariants()?;
    policies.check_invariants()?;
    index.check_invariants()?;

    let report = StructuresReport {
        routing: table.stats(),
        routes: table.len(),
        policies: policies.stats(),
        snapshots: index.stats(),
        snapshot_entries: index.len(),
    };
    println!("Routing table: {} routes, {}", report.routes, report.routing);
    println!(
        "Policy index: {} prefixes over {} nodes",
        report.policies.prefixes, report.policies.nodes
    );
    println!(
        "Snapshot index (order {}): {} entries, height {}, {} nodes, {} splits, {} merges",
        report.snapshots.order,
        report.snapshot_entries,
        report.snapshots.height,
        report.snapshots.nodes,
        report.snapshots.splits,
        report.snapshots.merges
    );
    Ok(report)
}

/// Save, list and restore topology snapshots under `dir`
pub fn run_snapshots_scenario(config: SimConfig, dir: &Path) -> Result<Network, NetworkError> {
    info!(dir = %dir.display(), "=== Running snapshot scenario ===");
    let mut net = Network::new(config.with_snapshot_dir(dir))?;
    build_lab(&mut net)?;

    let (key, path) = net.save_snapshot(Some("lab_baseline"))?;
    println!("Saved {key} to {}", path.display());

    net.remove_device("PC2")?;
    device_mut(&mut net, "R1")?.remove_route(Ipv4Addr::new(192, 168, 2, 0), MASK_24);
    let (key, path) = net.save_snapshot(Some("lab_without_pc2"))?;
    println!("Saved {key} to {}", path.display());

    println!("\n--- Snapshots ---");
    for (key, path) in net.snapshots() {
        println!("  {key}: {path}");
    }
    println!("  Index: {:?}", net.snapshot_store().index_stats());

    net.load_snapshot("lab_baseline")?;
    println!("\nRestored lab_baseline: {}", net.device_names().join(", "));
    println!("  {}", net.state_summary());
    Ok(net)
}
