//! Routing structure benchmarks
//!
//! - Route table insert and most-specific lookup
//! - Policy trie longest-prefix match
//!
//! Run with: cargo bench -p iosim-routing

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::net::Ipv4Addr;

use iosim_routing::{Policy, PolicyIndex, RoutingTable};

fn populated_table(routes: u32) -> RoutingTable {
    let mut table = RoutingTable::new();
    let mask = Ipv4Addr::new(255, 255, 255, 0);
    for i in 0..routes {
        let prefix = Ipv4Addr::from(0x0A00_0000 | (i << 8));
        table.add_route(prefix, mask, Ipv4Addr::new(192, 168, 0, 1), i % 16);
    }
    table.add_route(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(192, 168, 0, 254), 100);
    table
}

fn bench_routing_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_table");

    for size in [64u32, 1024, 8192] {
        group.bench_with_input(BenchmarkId::new("insert", size), &size, |b, &size| {
            b.iter(|| populated_table(black_box(size)))
        });

        let table = populated_table(size);
        group.bench_with_input(BenchmarkId::new("lookup_hit", size), &size, |b, &size| {
            let dest = Ipv4Addr::from(0x0A00_0000 | ((size / 2) << 8) | 7);
            b.iter(|| table.lookup(black_box(dest)))
        });
        group.bench_with_input(BenchmarkId::new("lookup_default", size), &size, |b, _| {
            b.iter(|| table.lookup(black_box(Ipv4Addr::new(8, 8, 8, 8))))
        });
    }

    group.finish();
}

fn bench_policy_index(c: &mut Criterion) {
    let mut index = PolicyIndex::new();
    for a in 0..32u8 {
        index.insert(Ipv4Addr::new(10, a, 0, 0), Ipv4Addr::new(255, 255, 0, 0), Policy::TtlMin(a % 8));
        for b in 0..32u8 {
            index.insert(Ipv4Addr::new(10, a, b, 0), Ipv4Addr::new(255, 255, 240, 0), Policy::Block);
        }
    }
    index.insert(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0), Policy::Block);

    c.bench_function("policy_lpm_deep", |b| {
        b.iter(|| index.search_longest_prefix(black_box(Ipv4Addr::new(10, 17, 21, 9))))
    });
    c.bench_function("policy_lpm_miss", |b| {
        b.iter(|| index.search_longest_prefix(black_box(Ipv4Addr::new(172, 16, 0, 1))))
    });
}

criterion_group!(benches, bench_routing_table, bench_policy_index);
criterion_main!(benches);
