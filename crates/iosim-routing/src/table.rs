//! Per-device routing table
//!
//! The [`RoutingTable`] stores routes in an [`AvlTree`] keyed by the
//! `"<network>/<prefix length>"` string of each route. Lookup probes the
//! destination at every prefix length from /32 down to /0 and returns the
//! first table hit, which is the most specific route that covers it.

use std::net::Ipv4Addr;

use iosim_core::{InvariantError, prefix_len, route_key};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::avl::{AvlTree, TreeStats};

/// A single route entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Address of the next router on the way to the destination
    pub next_hop: Ipv4Addr,
    /// Route cost
    pub metric: u32,
    /// Dotted-quad mask the route was configured with
    pub mask: Ipv4Addr,
}

impl Route {
    pub fn new(next_hop: Ipv4Addr, metric: u32, mask: Ipv4Addr) -> Self {
        Self {
            next_hop,
            metric,
            mask,
        }
    }
}

/// Balanced routing table owned by a single device
#[derive(Debug, Default)]
pub struct RoutingTable {
    tree: AvlTree<String, Route>,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route under a raw key, overwriting any existing entry
    pub fn insert(&mut self, key: impl Into<String>, route: Route) -> Option<Route> {
        self.tree.insert(key.into(), route)
    }

    /// Remove a route by key
    pub fn delete(&mut self, key: &str) -> Option<Route> {
        self.tree.delete(key)
    }

    /// Look up a route by exact key
    pub fn search(&self, key: &str) -> Option<&Route> {
        self.tree.search(key)
    }

    /// All routes in key order
    pub fn all(&self) -> Vec<(&str, &Route)> {
        self.tree.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    pub fn stats(&self) -> TreeStats {
        self.tree.stats()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Add a route for `prefix`/`mask`, keyed by its masked network
    ///
    /// Returns the key the route was stored under.
    pub fn add_route(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, metric: u32) -> String {
        let key = route_key(prefix, prefix_len(mask));
        debug!(route = %key, %next_hop, metric, "adding route");
        self.tree.insert(key.clone(), Route::new(next_hop, metric, mask));
        key
    }

    /// Remove the route for `prefix`/`mask`, returns whether one existed
    pub fn remove_route(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let key = route_key(prefix, prefix_len(mask));
        let removed = self.tree.delete(key.as_str()).is_some();
        if removed {
            debug!(route = %key, "removed route");
        }
        removed
    }

    /// Most specific route covering `destination`
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<(&str, &Route)> {
        if self.tree.is_empty() {
            return None;
        }
        (0..=32u8).rev().find_map(|len| {
            let key = route_key(destination, len);
            trace!(probe = %key, "route lookup");
            self.tree
                .search_entry(key.as_str())
                .map(|(k, v)| (k.as_str(), v))
        })
    }

    /// Indented dump of the underlying tree
    pub fn render(&self) -> String {
        self.tree.render()
    }

    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.tree.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn table() -> RoutingTable {
        let mut table = RoutingTable::new();
        table.add_route(ip("10.0.0.0"), ip("255.0.0.0"), ip("192.168.1.1"), 10);
        table.add_route(ip("10.1.0.0"), ip("255.255.0.0"), ip("192.168.1.2"), 5);
        table.add_route(ip("0.0.0.0"), ip("0.0.0.0"), ip("192.168.1.254"), 100);
        table
    }

    #[test]
    fn test_add_route_normalizes_key() {
        let mut table = RoutingTable::new();
        let key = table.add_route(ip("172.16.5.9"), ip("255.255.0.0"), ip("1.1.1.1"), 1);
        assert_eq!(key, "172.16.0.0/16");
        assert!(table.search("172.16.0.0/16").is_some());
    }

    #[test]
    fn test_lookup_prefers_most_specific() {
        let table = table();
        let (key, route) = table.lookup(ip("10.1.2.3")).unwrap();
        assert_eq!(key, "10.1.0.0/16");
        assert_eq!(route.next_hop, ip("192.168.1.2"));

        let (key, _) = table.lookup(ip("10.200.0.1")).unwrap();
        assert_eq!(key, "10.0.0.0/8");
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        let table = table();
        let (key, route) = table.lookup(ip("8.8.8.8")).unwrap();
        assert_eq!(key, "0.0.0.0/0");
        assert_eq!(route.metric, 100);
    }

    #[test]
    fn test_lookup_without_match() {
        let mut table = RoutingTable::new();
        assert!(table.lookup(ip("10.0.0.1")).is_none());
        table.add_route(ip("192.168.0.0"), ip("255.255.0.0"), ip("1.1.1.1"), 1);
        assert!(table.lookup(ip("10.0.0.1")).is_none());
    }

    #[test]
    fn test_remove_route() {
        let mut table = table();
        assert!(table.remove_route(ip("10.1.0.0"), ip("255.255.0.0")));
        assert!(!table.remove_route(ip("10.1.0.0"), ip("255.255.0.0")));
        let (key, _) = table.lookup(ip("10.1.2.3")).unwrap();
        assert_eq!(key, "10.0.0.0/8");
    }

    #[test]
    fn test_all_in_string_order() {
        let table = table();
        let keys: Vec<&str> = table.all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["0.0.0.0/0", "10.0.0.0/8", "10.1.0.0/16"]);
        assert_eq!(table.stats().nodes, 3);
    }
}
