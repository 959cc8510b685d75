//! Multiway balanced snapshot index
//!
//! [`SnapshotIndex`] is an order-`M` B-tree mapping snapshot identifiers to
//! the location of their stored configuration. The network controller owns
//! exactly one index.
//!
//! ## Rebalancing
//!
//! - **Split**: a node that reaches `M` keys after an insert keeps the keys
//!   left of index `M / 2`, promotes that median to its parent and moves the
//!   rest into a new right sibling. A root split grows the tree by one level.
//! - **Borrow**: a node that drops below `ceil(M / 2) - 1` keys takes one key
//!   through the parent from a sibling with a surplus, left sibling first.
//! - **Merge**: with no surplus on either side, the node, the separating
//!   parent key and a sibling fuse into one node.
//!
//! The root is exempt from the minimum and collapses into its only child once
//! it runs out of keys.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Write};

use iosim_core::InvariantError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

/// Default B-tree order
pub const DEFAULT_ORDER: usize = 4;

/// Smallest supported order
pub const MIN_ORDER: usize = 3;

/// Statistics surface for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub order: usize,
    pub height: usize,
    pub nodes: usize,
    pub splits: u64,
    pub merges: u64,
}

#[derive(Debug)]
struct BNode<K, V> {
    entries: Vec<(K, V)>,
    /// Empty for leaves, otherwise `entries.len() + 1` long
    children: Vec<BNode<K, V>>,
}

impl<K, V> BNode<K, V> {
    fn leaf() -> Self {
        Self {
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn find<Q>(&self, key: &Q) -> Result<usize, usize>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.binary_search_by(|(k, _)| k.borrow().cmp(key))
    }
}

/// Structural counters updated by the recursive helpers
#[derive(Debug, Default)]
struct Counters {
    nodes: usize,
    splits: u64,
    merges: u64,
}

enum Inserted<K, V> {
    Fresh,
    Replaced(V),
    Split((K, V), BNode<K, V>),
}

/// Order-`M` B-tree keyed by snapshot identifier
#[derive(Debug)]
pub struct SnapshotIndex<K, V> {
    root: BNode<K, V>,
    order: usize,
    len: usize,
    counters: Counters,
}

impl<K, V> SnapshotIndex<K, V> {
    /// Create an empty index of the given order
    pub fn new(order: usize) -> Result<Self, StorageError> {
        if order < MIN_ORDER {
            return Err(StorageError::InvalidOrder(order));
        }
        Ok(Self {
            root: BNode::leaf(),
            order,
            len: 0,
            counters: Counters {
                nodes: 1,
                ..Default::default()
            },
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; an empty index still has its root leaf
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = &self.root;
        while let Some(child) = node.children.first() {
            height += 1;
            node = child;
        }
        height
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            order: self.order,
            height: self.height(),
            nodes: self.counters.nodes,
            splits: self.counters.splits,
            merges: self.counters.merges,
        }
    }

    /// All entries in key order
    pub fn all_entries(&self) -> Vec<(&K, &V)> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut out);
        out
    }

    fn min_keys(&self) -> usize {
        min_keys(self.order)
    }
}

fn min_keys(order: usize) -> usize {
    order.div_ceil(2) - 1
}

impl<K: Ord + Debug, V> SnapshotIndex<K, V> {
    /// Insert or update an entry, returning the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let replaced = match insert(&mut self.root, key, value, self.order, &mut self.counters) {
            Inserted::Fresh => None,
            Inserted::Replaced(old) => Some(old),
            Inserted::Split(median, right) => {
                let left = std::mem::replace(&mut self.root, BNode::leaf());
                self.root = BNode {
                    entries: vec![median],
                    children: vec![left, right],
                };
                self.counters.nodes += 1;
                debug!(height = self.height(), "root split");
                None
            }
        };
        if replaced.is_none() {
            self.len += 1;
        }
        self.debug_check();
        replaced
    }

    /// Remove an entry, returning its value if it was present
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let (_, value) = remove(&mut self.root, key, self.order, &mut self.counters)?;
        self.len -= 1;

        if self.root.entries.is_empty() && !self.root.is_leaf() {
            let old_root = std::mem::replace(&mut self.root, BNode::leaf());
            if let Some(child) = old_root.children.into_iter().next() {
                self.root = child;
            }
            self.counters.nodes -= 1;
            debug!(height = self.height(), "root collapsed");
        }

        self.debug_check();
        Some(value)
    }

    /// Look up a value by key
    pub fn search<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut node = &self.root;
        loop {
            match node.find(key) {
                Ok(i) => return Some(&node.entries[i].1),
                Err(i) => node = node.children.get(i)?,
            }
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.search(key).is_some()
    }

    /// Verify occupancy, child counts, leaf depth, ordering and counters
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut walk = Walk {
            order: self.order,
            leaf_depth: None,
            nodes: 0,
            entries: 0,
        };
        walk.check(&self.root, 0, None, None)?;

        if walk.nodes != self.counters.nodes {
            return Err(InvariantError::NodeCount {
                counted: walk.nodes,
                tracked: self.counters.nodes,
            });
        }
        if walk.entries != self.len {
            return Err(InvariantError::NodeCount {
                counted: walk.entries,
                tracked: self.len,
            });
        }
        Ok(())
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        if let Err(e) = self.check_invariants() {
            panic!("B-tree invariant violated: {e}");
        }
    }
}

impl<K: Display, V> SnapshotIndex<K, V> {
    /// One line per level, nodes shown as bracketed key lists
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut level = vec![&self.root];
        let mut depth = 0;
        while !level.is_empty() {
            let nodes: Vec<String> = level
                .iter()
                .map(|node| {
                    let keys: Vec<String> = node.entries.iter().map(|(k, _)| k.to_string()).collect();
                    format!("[{}]", keys.join(", "))
                })
                .collect();
            let _ = writeln!(out, "Level {depth}: {}", nodes.join(" "));
            level = level.iter().flat_map(|node| node.children.iter()).collect();
            depth += 1;
        }
        out
    }
}

impl<K, V> Default for SnapshotIndex<K, V> {
    fn default() -> Self {
        Self {
            root: BNode::leaf(),
            order: DEFAULT_ORDER,
            len: 0,
            counters: Counters {
                nodes: 1,
                ..Default::default()
            },
        }
    }
}

fn insert<K: Ord + Debug, V>(
    node: &mut BNode<K, V>,
    key: K,
    value: V,
    order: usize,
    counters: &mut Counters,
) -> Inserted<K, V> {
    match node.find(&key) {
        Ok(i) => return Inserted::Replaced(std::mem::replace(&mut node.entries[i].1, value)),
        Err(i) if node.is_leaf() => node.entries.insert(i, (key, value)),
        Err(i) => match insert(&mut node.children[i], key, value, order, counters) {
            Inserted::Split(median, right) => {
                node.entries.insert(i, median);
                node.children.insert(i + 1, right);
            }
            done => return done,
        },
    }

    if node.entries.len() < order {
        return Inserted::Fresh;
    }

    let mid = order / 2;
    let right_entries = node.entries.split_off(mid + 1);
    let right_children = if node.is_leaf() {
        Vec::new()
    } else {
        node.children.split_off(mid + 1)
    };
    let Some(median) = node.entries.pop() else {
        return Inserted::Fresh;
    };
    counters.splits += 1;
    counters.nodes += 1;
    debug!(median = ?median.0, "node split");

    Inserted::Split(
        median,
        BNode {
            entries: right_entries,
            children: right_children,
        },
    )
}

fn remove<K, V, Q>(
    node: &mut BNode<K, V>,
    key: &Q,
    order: usize,
    counters: &mut Counters,
) -> Option<(K, V)>
where
    K: Borrow<Q> + Debug,
    Q: Ord + ?Sized,
{
    match node.find(key) {
        Ok(i) if node.is_leaf() => Some(node.entries.remove(i)),
        Ok(i) => {
            // Swap in the predecessor unless the left child sits at the
            // minimum and the right child can spare its smallest key
            let min = min_keys(order);
            let use_successor =
                node.children[i].entries.len() <= min && node.children[i + 1].entries.len() > min;
            let (replacement, child) = if use_successor {
                (take_min(&mut node.children[i + 1], order, counters)?, i + 1)
            } else {
                (take_max(&mut node.children[i], order, counters)?, i)
            };
            let removed = std::mem::replace(&mut node.entries[i], replacement);
            repair(node, child, order, counters);
            Some(removed)
        }
        Err(_) if node.is_leaf() => None,
        Err(i) => {
            let removed = remove(&mut node.children[i], key, order, counters)?;
            repair(node, i, order, counters);
            Some(removed)
        }
    }
}

fn take_max<K: Debug, V>(node: &mut BNode<K, V>, order: usize, counters: &mut Counters) -> Option<(K, V)> {
    if node.is_leaf() {
        return node.entries.pop();
    }
    let last = node.children.len() - 1;
    let entry = take_max(&mut node.children[last], order, counters)?;
    repair(node, last, order, counters);
    Some(entry)
}

fn take_min<K: Debug, V>(node: &mut BNode<K, V>, order: usize, counters: &mut Counters) -> Option<(K, V)> {
    if node.is_leaf() {
        if node.entries.is_empty() {
            return None;
        }
        return Some(node.entries.remove(0));
    }
    let entry = take_min(&mut node.children[0], order, counters)?;
    repair(node, 0, order, counters);
    Some(entry)
}

/// Restore the minimum occupancy of `node.children[i]`
fn repair<K: Debug, V>(node: &mut BNode<K, V>, i: usize, order: usize, counters: &mut Counters) {
    let min = min_keys(order);
    if node.children[i].entries.len() >= min {
        return;
    }

    if i > 0 && node.children[i - 1].entries.len() > min {
        borrow_from_left(node, i);
    } else if i + 1 < node.children.len() && node.children[i + 1].entries.len() > min {
        borrow_from_right(node, i);
    } else if i > 0 {
        merge(node, i - 1, counters);
    } else {
        merge(node, i, counters);
    }
}

fn borrow_from_left<K, V>(node: &mut BNode<K, V>, i: usize) {
    let (left, right) = node.children.split_at_mut(i);
    let (sibling, child) = (&mut left[i - 1], &mut right[0]);
    let Some(entry) = sibling.entries.pop() else {
        return;
    };
    let separator = std::mem::replace(&mut node.entries[i - 1], entry);
    child.entries.insert(0, separator);
    if let Some(grandchild) = sibling.children.pop() {
        child.children.insert(0, grandchild);
    }
    debug!("borrowed from left sibling");
}

fn borrow_from_right<K, V>(node: &mut BNode<K, V>, i: usize) {
    let (left, right) = node.children.split_at_mut(i + 1);
    let (child, sibling) = (&mut left[i], &mut right[0]);
    if sibling.entries.is_empty() {
        return;
    }
    let entry = sibling.entries.remove(0);
    let separator = std::mem::replace(&mut node.entries[i], entry);
    child.entries.push(separator);
    if !sibling.is_leaf() {
        child.children.push(sibling.children.remove(0));
    }
    debug!("borrowed from right sibling");
}

/// Fuse `children[i]`, `entries[i]` and `children[i + 1]`
fn merge<K: Debug, V>(node: &mut BNode<K, V>, i: usize, counters: &mut Counters) {
    let right = node.children.remove(i + 1);
    let separator = node.entries.remove(i);
    debug!(separator = ?separator.0, "merging siblings");

    let left = &mut node.children[i];
    left.entries.push(separator);
    left.entries.extend(right.entries);
    left.children.extend(right.children);

    counters.merges += 1;
    counters.nodes -= 1;
}

fn collect<'a, K, V>(node: &'a BNode<K, V>, out: &mut Vec<(&'a K, &'a V)>) {
    if node.is_leaf() {
        out.extend(node.entries.iter().map(|(k, v)| (k, v)));
        return;
    }
    for (i, child) in node.children.iter().enumerate() {
        collect(child, out);
        if let Some((k, v)) = node.entries.get(i) {
            out.push((k, v));
        }
    }
}

struct Walk {
    order: usize,
    leaf_depth: Option<usize>,
    nodes: usize,
    entries: usize,
}

impl Walk {
    fn check<K: Ord + Debug, V>(
        &mut self,
        node: &BNode<K, V>,
        depth: usize,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(), InvariantError> {
        self.nodes += 1;
        self.entries += node.entries.len();

        let keys = node.entries.len();
        let max = self.order - 1;
        let min = if depth == 0 { 0 } else { min_keys(self.order) };
        if keys < min || keys > max || (depth == 0 && keys == 0 && !node.is_leaf()) {
            return Err(InvariantError::Occupancy { keys, min, max });
        }

        let mut prev = lower;
        for (k, _) in &node.entries {
            if prev.is_some_and(|p| p >= k) {
                return Err(InvariantError::OutOfOrder {
                    key: format!("{k:?}"),
                });
            }
            prev = Some(k);
        }
        if let (Some(last), Some(hi)) = (prev, upper) {
            if last >= hi {
                return Err(InvariantError::OutOfOrder {
                    key: format!("{last:?}"),
                });
            }
        }

        if node.is_leaf() {
            match self.leaf_depth {
                None => self.leaf_depth = Some(depth),
                Some(first) if first != depth => {
                    return Err(InvariantError::UnevenLeaves { first, other: depth });
                }
                Some(_) => {}
            }
            return Ok(());
        }

        if node.children.len() != keys + 1 {
            return Err(InvariantError::ChildCount {
                keys,
                children: node.children.len(),
            });
        }

        for (i, child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.entries[i - 1].0) };
            let hi = node.entries.get(i).map(|(k, _)| k).or(upper);
            self.check(child, depth + 1, lo, hi)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(order: usize, keys: impl IntoIterator<Item = u32>) -> SnapshotIndex<u32, String> {
        let mut index = SnapshotIndex::new(order).unwrap();
        for k in keys {
            index.insert(k, format!("snapshots/{k}.cfg"));
        }
        index
    }

    #[test]
    fn test_order_three_ascending_splits_twice() {
        let index = index_with(3, 1..=5);
        let stats = index.stats();
        assert_eq!(stats.splits, 2);
        assert_eq!(stats.height, 2);
        assert_eq!(stats.nodes, 4);
        assert_eq!(index.render(), "Level 0: [2, 4]\nLevel 1: [1] [3] [5]\n");
    }

    #[test]
    fn test_rejects_small_order() {
        assert!(matches!(
            SnapshotIndex::<u32, u32>::new(2),
            Err(StorageError::InvalidOrder(2))
        ));
        assert_eq!(SnapshotIndex::<u32, u32>::default().order(), DEFAULT_ORDER);
    }

    #[test]
    fn test_empty_index() {
        let index: SnapshotIndex<String, String> = SnapshotIndex::new(4).unwrap();
        let stats = index.stats();
        assert_eq!((stats.height, stats.nodes), (1, 1));
        assert!(index.search("missing").is_none());
        assert!(index.all_entries().is_empty());
    }

    #[test]
    fn test_duplicate_insert_updates_value() {
        let mut index = index_with(4, 1..=10);
        let splits = index.stats().splits;
        assert_eq!(
            index.insert(7, "elsewhere".to_string()),
            Some("snapshots/7.cfg".to_string())
        );
        assert_eq!(index.len(), 10);
        assert_eq!(index.search(&7).map(String::as_str), Some("elsewhere"));
        assert_eq!(index.stats().splits, splits);
    }

    #[test]
    fn test_all_entries_sorted() {
        let index = index_with(4, [50, 10, 40, 20, 30, 60, 5, 45]);
        let keys: Vec<u32> = index.all_entries().into_iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![5, 10, 20, 30, 40, 45, 50, 60]);
    }

    #[test]
    fn test_delete_from_leaf_borrows() {
        // Root [2, 4] over leaves [1] [3] [5, 6]
        let mut index = index_with(3, 1..=5);
        index.insert(6, "six".into());
        assert_eq!(index.render(), "Level 0: [2, 4]\nLevel 1: [1] [3] [5, 6]\n");

        assert!(index.delete(&3).is_some());
        assert_eq!(index.render(), "Level 0: [2, 5]\nLevel 1: [1] [4] [6]\n");
        assert_eq!(index.stats().merges, 0);
    }

    #[test]
    fn test_delete_merges_and_collapses_root() {
        let mut index = index_with(3, 1..=3);
        assert_eq!(index.stats().height, 2);

        assert_eq!(index.delete(&1), Some("snapshots/1.cfg".to_string()));
        let stats = index.stats();
        assert_eq!(stats.merges, 1);
        assert_eq!(stats.height, 1);
        assert_eq!(stats.nodes, 1);
        assert_eq!(index.render(), "Level 0: [2, 3]\n");
    }

    #[test]
    fn test_insert_then_delete_restores_listing() {
        let mut index = index_with(3, [1, 2]);
        let before: Vec<(u32, String)> = index.all_entries().into_iter().map(|(k, v)| (*k, v.clone())).collect();

        // A third key splits the leaf; removing it merges the halves back
        index.insert(3, "three".into());
        assert_eq!(index.stats().splits, 1);
        assert_eq!(index.delete(&3), Some("three".to_string()));
        assert_eq!(index.stats().merges, 1);

        let after: Vec<(u32, String)> = index.all_entries().into_iter().map(|(k, v)| (*k, v.clone())).collect();
        assert_eq!(after, before);
        assert_eq!(index.render(), "Level 0: [1, 2]\n");
    }

    #[test]
    fn test_delete_internal_key() {
        let mut index = index_with(4, 1..=20);
        for k in [8, 4, 12, 16] {
            assert!(index.delete(&k).is_some(), "key {k}");
            assert!(index.search(&k).is_none());
        }
        assert_eq!(index.len(), 16);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_delete_missing() {
        let mut index = index_with(5, 1..=8);
        assert!(index.delete(&100).is_none());
        assert_eq!(index.len(), 8);
    }

    #[test]
    fn test_drain_all_orders() {
        for order in 3..=7 {
            let mut index = index_with(order, (0..60).map(|k| (k * 37) % 61));
            for k in 0..61 {
                index.delete(&k);
            }
            assert!(index.is_empty(), "order {order}");
            assert_eq!(index.stats().height, 1);
            assert_eq!(index.stats().nodes, 1);
        }
    }

    #[test]
    fn test_string_keys() {
        let mut index: SnapshotIndex<String, String> = SnapshotIndex::default();
        index.insert("snapshot_2".into(), "b".into());
        index.insert("snapshot_10".into(), "a".into());
        assert_eq!(index.search("snapshot_10").map(String::as_str), Some("a"));
        let keys: Vec<&str> = index.all_entries().into_iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["snapshot_10", "snapshot_2"]);
    }
}
