//! Prefix policies with longest-prefix match
//!
//! [`PolicyIndex`] is an n-ary trie with one level per IPv4 octet. A prefix of
//! length `len` lives at depth `ceil(len / 8)`; each edge on its path is the
//! corresponding address octet ANDed with the mask octet, so every address
//! that shares a masked prefix lands on the same node.
//!
//! ## Matching
//!
//! Lookups walk the unmasked address. At each level the index records any
//! child terminus whose masked octet covers the address octet (this is how
//! prefixes ending inside an octet, like /20, are found), then descends along
//! the exact octet. Deeper matches overwrite shallower ones.
//!
//! Prefixes of different lengths can end on the same node (a /12 and a /16
//! over `172.16`), so each node keeps its termini keyed by prefix length.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::net::Ipv4Addr;

use iosim_core::{InvariantError, apply_mask, octet_mask, prefix_len};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Action attached to a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRepr", into = "PolicyRepr")]
pub enum Policy {
    /// Drop every packet to the prefix
    Block,
    /// Drop packets whose TTL is below the floor
    TtlMin(u8),
}

impl Policy {
    /// Whether a packet with `ttl` would be rejected
    pub fn rejects(&self, ttl: u8) -> bool {
        match self {
            Self::Block => true,
            Self::TtlMin(min) => ttl < *min,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::TtlMin(min) => write!(f, "ttl_min={min}"),
        }
    }
}

/// Wire shape: `{"block": true}` or `{"ttl_min": n}`
#[derive(Serialize, Deserialize)]
struct PolicyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_min: Option<u8>,
}

impl TryFrom<PolicyRepr> for Policy {
    type Error = String;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        match (repr.block, repr.ttl_min) {
            (Some(true), None) => Ok(Self::Block),
            (None | Some(false), Some(min)) => Ok(Self::TtlMin(min)),
            _ => Err("policy must be exactly one of {block: true} or {ttl_min: n}".to_string()),
        }
    }
}

impl From<Policy> for PolicyRepr {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Block => Self {
                block: Some(true),
                ttl_min: None,
            },
            Policy::TtlMin(min) => Self {
                block: None,
                ttl_min: Some(min),
            },
        }
    }
}

/// Node and prefix counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub nodes: usize,
    pub prefixes: usize,
}

#[derive(Debug, Clone)]
struct Terminus {
    /// Literal `"ip/len"` as inserted
    prefix: String,
    network: Ipv4Addr,
    len: u8,
    policy: Policy,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: BTreeMap<u8, Box<TrieNode>>,
    termini: BTreeMap<u8, Terminus>,
}

impl TrieNode {
    fn is_prunable(&self) -> bool {
        self.children.is_empty() && self.termini.is_empty()
    }

    /// Longest terminus on this node whose masked octet at `level` covers `octet`
    fn covering(&self, key: u8, octet: u8, level: usize) -> Option<&Terminus> {
        self.termini
            .values()
            .rev()
            .find(|t| octet & octet_mask(t.len, level) == key)
    }
}

/// Octet trie of address prefixes, owned by a single device
#[derive(Debug)]
pub struct PolicyIndex {
    root: TrieNode,
    nodes: usize,
    prefixes: usize,
}

impl PolicyIndex {
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
            nodes: 1,
            prefixes: 0,
        }
    }

    /// Attach `policy` to `address`/`mask`, returning the policy it replaced
    pub fn insert(&mut self, address: Ipv4Addr, mask: Ipv4Addr, policy: Policy) -> Option<Policy> {
        let len = prefix_len(mask);
        let octets = address.octets();
        let mut node = &mut self.root;

        for (i, octet) in octets.iter().enumerate().take(depth_for(len)) {
            let key = octet & octet_mask(len, i);
            node = &mut **node.children.entry(key).or_insert_with(|| {
                self.nodes += 1;
                Box::default()
            });
        }

        let terminus = Terminus {
            prefix: format!("{address}/{len}"),
            network: apply_mask(address, mask),
            len,
            policy,
        };
        debug!(prefix = %terminus.prefix, %policy, "policy set");

        let previous = node.termini.insert(len, terminus).map(|t| t.policy);
        if previous.is_none() {
            self.prefixes += 1;
        }
        self.debug_check();
        previous
    }

    /// Remove the policy for `address`/`mask`, pruning emptied nodes
    ///
    /// Returns the removed policy, or `None` when the prefix was not present.
    pub fn delete(&mut self, address: Ipv4Addr, mask: Ipv4Addr) -> Option<Policy> {
        let len = prefix_len(mask);
        let keys: Vec<u8> = address
            .octets()
            .iter()
            .enumerate()
            .take(depth_for(len))
            .map(|(i, octet)| octet & octet_mask(len, i))
            .collect();

        let mut pruned = 0;
        let removed = remove(&mut self.root, &keys, len, &mut pruned)?;
        self.nodes -= pruned;
        self.prefixes -= 1;
        debug!(prefix = %removed.prefix, pruned, "policy removed");
        self.debug_check();
        Some(removed.policy)
    }

    /// Policy stored for the prefix whose network address is exactly `address`
    ///
    /// When several stored prefixes share that network address, the most
    /// specific one wins.
    pub fn search_exact(&self, address: Ipv4Addr) -> Option<Policy> {
        let exact = |node: &TrieNode| {
            node.termini
                .values()
                .rev()
                .find(|t| t.network == address)
                .map(|t| t.policy)
        };

        let mut best = exact(&self.root);
        let mut node = &self.root;
        for octet in address.octets() {
            let Some(child) = node.children.get(&octet) else {
                break;
            };
            node = &**child;
            best = exact(node).or(best);
        }
        best
    }

    /// Most specific stored prefix that contains `address`
    pub fn search_longest_prefix(&self, address: Ipv4Addr) -> Option<(&str, Policy)> {
        let mut best = self.root.termini.values().next_back();
        let mut node = &self.root;

        for (i, octet) in address.octets().into_iter().enumerate() {
            let level_best = node
                .children
                .iter()
                .filter_map(|(key, child)| child.covering(*key, octet, i))
                .max_by_key(|t| t.len);
            if level_best.is_some() {
                best = level_best;
            }

            match node.children.get(&octet) {
                Some(child) => node = &**child,
                None => break,
            }
        }

        best.map(|t| (t.prefix.as_str(), t.policy))
    }

    /// Every stored prefix with its policy, in trie order
    pub fn all_prefixes(&self) -> Vec<(&str, Policy)> {
        let mut out = Vec::with_capacity(self.prefixes);
        collect(&self.root, &mut out);
        out
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            nodes: self.nodes,
            prefixes: self.prefixes,
        }
    }

    /// Number of stored prefixes
    pub fn len(&self) -> usize {
        self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes == 0
    }

    /// Remove every prefix
    pub fn clear(&mut self) {
        self.root = TrieNode::default();
        self.nodes = 1;
        self.prefixes = 0;
    }

    /// Indented dump of the trie, one line per edge
    pub fn render(&self) -> String {
        let mut out = String::new();
        for t in self.root.termini.values() {
            let _ = writeln!(out, "{} {{{}}}", t.prefix, t.policy);
        }
        render_children(&self.root, 0, &mut out);
        out
    }

    /// Verify node bookkeeping, pruning and terminus depths
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut nodes = 0;
        let mut prefixes = 0;
        check_node(&self.root, 0, &mut nodes, &mut prefixes)?;
        if nodes != self.nodes {
            return Err(InvariantError::NodeCount {
                counted: nodes,
                tracked: self.nodes,
            });
        }
        if prefixes != self.prefixes {
            return Err(InvariantError::NodeCount {
                counted: prefixes,
                tracked: self.prefixes,
            });
        }
        Ok(())
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        if let Err(e) = self.check_invariants() {
            panic!("policy trie invariant violated: {e}");
        }
    }
}

impl Default for PolicyIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Trie depth of a prefix length
fn depth_for(len: u8) -> usize {
    usize::from(len).div_ceil(8)
}

fn remove(node: &mut TrieNode, keys: &[u8], len: u8, pruned: &mut usize) -> Option<Terminus> {
    let Some((&key, rest)) = keys.split_first() else {
        return node.termini.remove(&len);
    };

    let child = node.children.get_mut(&key)?;
    let removed = remove(child, rest, len, pruned)?;
    if child.is_prunable() {
        node.children.remove(&key);
        *pruned += 1;
    }
    Some(removed)
}

fn collect<'a>(node: &'a TrieNode, out: &mut Vec<(&'a str, Policy)>) {
    for t in node.termini.values() {
        out.push((t.prefix.as_str(), t.policy));
    }
    for child in node.children.values() {
        collect(child, out);
    }
}

fn render_children(node: &TrieNode, level: usize, out: &mut String) {
    for (octet, child) in &node.children {
        let indent = "  ".repeat(level);
        let termini: Vec<String> = child
            .termini
            .values()
            .map(|t| format!(" {} {{{}}}", t.prefix, t.policy))
            .collect();
        let _ = writeln!(out, "{indent}├── {octet}{}", termini.concat());
        render_children(child, level + 1, out);
    }
}

fn check_node(
    node: &TrieNode,
    depth: usize,
    nodes: &mut usize,
    prefixes: &mut usize,
) -> Result<(), InvariantError> {
    *nodes += 1;
    if depth > 0 && node.is_prunable() {
        return Err(InvariantError::Unpruned { depth });
    }
    for (len, t) in &node.termini {
        *prefixes += 1;
        if depth_for(*len) != depth || *len != t.len {
            return Err(InvariantError::HeightMismatch {
                key: t.prefix.clone(),
                stored: depth,
                computed: depth_for(*len),
            });
        }
    }
    for child in node.children.values() {
        check_node(child, depth + 1, nodes, prefixes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn scenario_index() -> PolicyIndex {
        let mut index = PolicyIndex::new();
        index.insert(ip("10.0.0.0"), ip("255.0.0.0"), Policy::Block);
        index.insert(ip("10.1.0.0"), ip("255.255.0.0"), Policy::TtlMin(3));
        index
    }

    #[test]
    fn test_longest_prefix_prefers_deeper_match() {
        let index = scenario_index();
        assert_eq!(
            index.search_longest_prefix(ip("10.1.5.5")),
            Some(("10.1.0.0/16", Policy::TtlMin(3)))
        );
        assert_eq!(
            index.search_longest_prefix(ip("10.2.0.0")),
            Some(("10.0.0.0/8", Policy::Block))
        );
        assert_eq!(index.search_longest_prefix(ip("11.0.0.1")), None);
    }

    #[test]
    fn test_partial_octet_prefix() {
        let mut index = PolicyIndex::new();
        index.insert(ip("172.16.0.0"), ip("255.240.0.0"), Policy::Block);

        assert_eq!(
            index.search_longest_prefix(ip("172.31.255.1")),
            Some(("172.16.0.0/12", Policy::Block))
        );
        assert_eq!(index.search_longest_prefix(ip("172.32.0.1")), None);
    }

    #[test]
    fn test_default_prefix_lives_at_root() {
        let mut index = scenario_index();
        index.insert(ip("0.0.0.0"), ip("0.0.0.0"), Policy::TtlMin(1));
        assert_eq!(index.stats().nodes, 3);
        assert_eq!(
            index.search_longest_prefix(ip("8.8.8.8")),
            Some(("0.0.0.0/0", Policy::TtlMin(1)))
        );
        assert_eq!(
            index.search_longest_prefix(ip("10.9.9.9")),
            Some(("10.0.0.0/8", Policy::Block))
        );
    }

    #[test]
    fn test_masked_octets_collapse() {
        let mut index = PolicyIndex::new();
        index.insert(ip("192.168.1.77"), ip("255.255.255.0"), Policy::Block);
        index.insert(ip("192.168.1.0"), ip("255.255.255.0"), Policy::TtlMin(5));

        // Same network and length, the later insert wins
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.search_longest_prefix(ip("192.168.1.200")),
            Some(("192.168.1.0/24", Policy::TtlMin(5)))
        );
    }

    #[test]
    fn test_lengths_sharing_a_node_coexist() {
        let mut index = PolicyIndex::new();
        assert_eq!(index.insert(ip("172.16.0.0"), ip("255.240.0.0"), Policy::Block), None);
        assert_eq!(index.insert(ip("172.16.0.0"), ip("255.255.0.0"), Policy::TtlMin(3)), None);

        assert_eq!(index.stats(), PolicyStats { nodes: 3, prefixes: 2 });
        assert_eq!(
            index.all_prefixes(),
            vec![("172.16.0.0/12", Policy::Block), ("172.16.0.0/16", Policy::TtlMin(3))]
        );
        assert_eq!(
            index.search_longest_prefix(ip("172.16.9.9")),
            Some(("172.16.0.0/16", Policy::TtlMin(3)))
        );
        assert_eq!(
            index.search_longest_prefix(ip("172.20.0.1")),
            Some(("172.16.0.0/12", Policy::Block))
        );
        assert_eq!(index.search_exact(ip("172.16.0.0")), Some(Policy::TtlMin(3)));

        assert_eq!(index.delete(ip("172.16.0.0"), ip("255.255.0.0")), Some(Policy::TtlMin(3)));
        assert_eq!(index.all_prefixes(), vec![("172.16.0.0/12", Policy::Block)]);
        assert_eq!(
            index.search_longest_prefix(ip("172.16.9.9")),
            Some(("172.16.0.0/12", Policy::Block))
        );
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_insert_then_delete_restores_listing() {
        let mut index = scenario_index();
        index.insert(ip("10.1.32.0"), ip("255.255.240.0"), Policy::Block);
        let before: Vec<(String, Policy)> =
            index.all_prefixes().into_iter().map(|(p, v)| (p.to_string(), v)).collect();
        let stats = index.stats();

        // The /24 shares the /20's node; the others create nodes that must be pruned
        for (addr, mask) in [
            ("10.1.32.0", "255.255.255.0"),
            ("10.0.0.0", "255.240.0.0"),
            ("10.1.0.0", "255.255.255.255"),
        ] {
            assert_eq!(index.insert(ip(addr), ip(mask), Policy::TtlMin(9)), None);
            assert_eq!(index.delete(ip(addr), ip(mask)), Some(Policy::TtlMin(9)));

            let after: Vec<(String, Policy)> =
                index.all_prefixes().into_iter().map(|(p, v)| (p.to_string(), v)).collect();
            assert_eq!(after, before, "after {addr}/{mask}");
            assert_eq!(index.stats(), stats);
        }
    }

    #[test]
    fn test_search_exact() {
        let index = scenario_index();
        assert_eq!(index.search_exact(ip("10.1.0.0")), Some(Policy::TtlMin(3)));
        assert_eq!(index.search_exact(ip("10.0.0.0")), Some(Policy::Block));
        assert_eq!(index.search_exact(ip("10.1.5.5")), None);
    }

    #[test]
    fn test_delete_prunes_path() {
        let mut index = scenario_index();
        assert_eq!(index.stats(), PolicyStats { nodes: 3, prefixes: 2 });

        assert_eq!(index.delete(ip("10.1.0.0"), ip("255.255.0.0")), Some(Policy::TtlMin(3)));
        assert_eq!(index.stats(), PolicyStats { nodes: 2, prefixes: 1 });
        assert_eq!(
            index.search_longest_prefix(ip("10.1.5.5")),
            Some(("10.0.0.0/8", Policy::Block))
        );

        assert_eq!(index.delete(ip("10.0.0.0"), ip("255.0.0.0")), Some(Policy::Block));
        assert_eq!(index.stats(), PolicyStats { nodes: 1, prefixes: 0 });
        assert!(index.is_empty());
    }

    #[test]
    fn test_delete_keeps_nodes_with_children() {
        let mut index = scenario_index();
        assert_eq!(index.delete(ip("10.0.0.0"), ip("255.0.0.0")), Some(Policy::Block));
        assert_eq!(index.stats(), PolicyStats { nodes: 3, prefixes: 1 });
        assert_eq!(
            index.search_longest_prefix(ip("10.1.0.9")),
            Some(("10.1.0.0/16", Policy::TtlMin(3)))
        );
        assert_eq!(index.search_longest_prefix(ip("10.2.0.9")), None);
    }

    #[test]
    fn test_delete_missing() {
        let mut index = scenario_index();
        assert_eq!(index.delete(ip("10.0.0.0"), ip("255.255.0.0")), None);
        assert_eq!(index.delete(ip("192.168.0.0"), ip("255.255.0.0")), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_all_prefixes_and_clear() {
        let mut index = scenario_index();
        let prefixes: Vec<&str> = index.all_prefixes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(prefixes, vec!["10.0.0.0/8", "10.1.0.0/16"]);

        index.clear();
        assert!(index.all_prefixes().is_empty());
        assert_eq!(index.stats().nodes, 1);
    }

    #[test]
    fn test_policy_serde_shape() {
        assert_eq!(serde_json::to_string(&Policy::Block).unwrap(), r#"{"block":true}"#);
        assert_eq!(serde_json::to_string(&Policy::TtlMin(3)).unwrap(), r#"{"ttl_min":3}"#);

        let parsed: Policy = serde_json::from_str(r#"{"ttl_min":7}"#).unwrap();
        assert_eq!(parsed, Policy::TtlMin(7));
        assert!(serde_json::from_str::<Policy>(r#"{"block":true,"ttl_min":1}"#).is_err());
    }

    #[test]
    fn test_policy_rejects() {
        assert!(Policy::Block.rejects(255));
        assert!(Policy::TtlMin(3).rejects(2));
        assert!(!Policy::TtlMin(3).rejects(3));
    }
}
