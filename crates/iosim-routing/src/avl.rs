//! Height-balanced ordered map
//!
//! [`AvlTree`] is the storage behind the per-device [`RoutingTable`]. Every
//! recursive mutation takes ownership of a subtree and returns its (possibly
//! new) root; callers always overwrite the child link with the returned value.
//!
//! [`RoutingTable`]: crate::table::RoutingTable

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Write};

use iosim_core::InvariantError;
use serde::{Deserialize, Serialize};
use tracing::trace;

type Link<K, V> = Option<Box<Node<K, V>>>;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    height: usize,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            left: None,
            right: None,
            height: 1,
        }
    }

    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    fn balance(&self) -> i64 {
        height(&self.left) as i64 - height(&self.right) as i64
    }
}

fn height<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |n| n.height)
}

fn balance_of<K, V>(link: &Link<K, V>) -> i64 {
    link.as_ref().map_or(0, |n| n.balance())
}

/// Rotation counters, one per rebalancing case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCounts {
    #[serde(rename = "LL")]
    pub ll: u64,
    #[serde(rename = "LR")]
    pub lr: u64,
    #[serde(rename = "RL")]
    pub rl: u64,
    #[serde(rename = "RR")]
    pub rr: u64,
}

impl RotationCounts {
    pub fn total(&self) -> u64 {
        self.ll + self.lr + self.rl + self.rr
    }
}

/// Statistics surface for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub height: usize,
    pub rotations: RotationCounts,
}

/// Self-balancing binary search tree (AVL)
///
/// For every node the heights of its two subtrees differ by at most one.
/// Inserting an existing key overwrites its value in place.
#[derive(Debug)]
pub struct AvlTree<K, V> {
    root: Link<K, V>,
    len: usize,
    rotations: RotationCounts,
}

impl<K, V> AvlTree<K, V> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            rotations: RotationCounts::default(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the tree (0 when empty)
    pub fn height(&self) -> usize {
        height(&self.root)
    }

    /// Key at the root, if any
    pub fn root_key(&self) -> Option<&K> {
        self.root.as_ref().map(|n| &n.key)
    }

    /// Rotation counters accumulated since creation (or the last reset)
    pub fn rotations(&self) -> RotationCounts {
        self.rotations
    }

    /// Reset the rotation counters
    pub fn clear_rotations(&mut self) {
        self.rotations = RotationCounts::default();
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            nodes: self.len,
            height: self.height(),
            rotations: self.rotations,
        }
    }

    /// In-order iterator over the entries
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(self.root.as_deref());
        iter
    }

    /// All entries in key order
    pub fn all(&self) -> Vec<(&K, &V)> {
        self.iter().collect()
    }
}

impl<K: Ord + Debug, V> AvlTree<K, V> {
    /// Insert or overwrite an entry, returning the previous value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut replaced = None;
        let root = insert(self.root.take(), key, value, &mut self.rotations, &mut replaced);
        self.root = Some(root);
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
        let mut removed = None;
        self.root = delete(self.root.take(), key, &mut self.rotations, &mut removed);
        if removed.is_some() {
            self.len -= 1;
        }
        self.debug_check();
        removed
    }

    /// Look up a value by key
    pub fn search<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.search_entry(key).map(|(_, v)| v)
    }

    /// Look up the stored key and value
    pub fn search_entry<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match key.cmp(node.key.borrow()) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some((&node.key, &node.value)),
            };
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.search(key).is_some()
    }

    /// Verify ordering, stored heights, balance factors and the node count
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut counted = 0;
        check_subtree(&self.root, None, None, &mut counted)?;
        if counted != self.len {
            return Err(InvariantError::NodeCount {
                counted,
                tracked: self.len,
            });
        }
        Ok(())
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        if let Err(e) = self.check_invariants() {
            panic!("AVL invariant violated: {e}");
        }
    }
}

impl<K: Display, V> AvlTree<K, V> {
    /// Indented dump of the tree shape (`Root:`, `L:`, `R:`)
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root.as_deref() {
            render_node(root, 0, "Root: ", &mut out);
        }
        out
    }
}

fn render_node<K: Display, V>(node: &Node<K, V>, level: usize, label: &str, out: &mut String) {
    let _ = writeln!(out, "{}{}[{}]", "  ".repeat(level), label, node.key);
    if let Some(left) = node.left.as_deref() {
        render_node(left, level + 1, "L: ", out);
    }
    if let Some(right) = node.right.as_deref() {
        render_node(right, level + 1, "R: ", out);
    }
}

impl<K, V> Default for AvlTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn rotate_right<K, V>(mut y: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let Some(mut x) = y.left.take() else {
        return y;
    };
    y.left = x.right.take();
    y.update_height();
    x.right = Some(y);
    x.update_height();
    x
}

fn rotate_left<K, V>(mut x: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let Some(mut y) = x.right.take() else {
        return x;
    };
    x.right = y.left.take();
    x.update_height();
    y.left = Some(x);
    y.update_height();
    y
}

/// Recompute the height and apply at most one of the four rotation cases
fn rebalance<K: Debug, V>(
    mut node: Box<Node<K, V>>,
    rotations: &mut RotationCounts,
) -> Box<Node<K, V>> {
    node.update_height();
    let balance = node.balance();

    if balance > 1 {
        if balance_of(&node.left) >= 0 {
            rotations.ll += 1;
            trace!(case = "LL", key = ?node.key, "rotate right");
        } else {
            rotations.lr += 1;
            trace!(case = "LR", key = ?node.key, "rotate left-right");
            node.left = node.left.take().map(rotate_left);
        }
        return rotate_right(node);
    }

    if balance < -1 {
        if balance_of(&node.right) <= 0 {
            rotations.rr += 1;
            trace!(case = "RR", key = ?node.key, "rotate left");
        } else {
            rotations.rl += 1;
            trace!(case = "RL", key = ?node.key, "rotate right-left");
            node.right = node.right.take().map(rotate_right);
        }
        return rotate_left(node);
    }

    node
}

fn insert<K: Ord + Debug, V>(
    link: Link<K, V>,
    key: K,
    value: V,
    rotations: &mut RotationCounts,
    replaced: &mut Option<V>,
) -> Box<Node<K, V>> {
    let Some(mut node) = link else {
        return Box::new(Node::new(key, value));
    };

    match key.cmp(&node.key) {
        Ordering::Less => {
            node.left = Some(insert(node.left.take(), key, value, rotations, replaced));
        }
        Ordering::Greater => {
            node.right = Some(insert(node.right.take(), key, value, rotations, replaced));
        }
        Ordering::Equal => {
            *replaced = Some(std::mem::replace(&mut node.value, value));
            return node;
        }
    }

    rebalance(node, rotations)
}

fn delete<K, V, Q>(
    link: Link<K, V>,
    key: &Q,
    rotations: &mut RotationCounts,
    removed: &mut Option<V>,
) -> Link<K, V>
where
    K: Borrow<Q> + Debug,
    Q: Ord + ?Sized,
{
    let mut node = link?;

    match key.cmp(node.key.borrow()) {
        Ordering::Less => node.left = delete(node.left.take(), key, rotations, removed),
        Ordering::Greater => node.right = delete(node.right.take(), key, rotations, removed),
        Ordering::Equal => {
            let left = node.left.take();
            let right = node.right.take();
            *removed = Some(node.value);

            return match (left, right) {
                (None, right) => right,
                (left, None) => left,
                (Some(left), Some(right)) => {
                    // Promote the in-order successor into this position
                    let (rest, mut successor) = detach_min(right, rotations);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor, rotations))
                }
            };
        }
    }

    Some(rebalance(node, rotations))
}

/// Detach the minimum node of a subtree, rebalancing every ancestor
fn detach_min<K: Debug, V>(
    mut node: Box<Node<K, V>>,
    rotations: &mut RotationCounts,
) -> (Link<K, V>, Box<Node<K, V>>) {
    match node.left.take() {
        None => {
            let right = node.right.take();
            (right, node)
        }
        Some(left) => {
            let (rest, min) = detach_min(left, rotations);
            node.left = rest;
            (Some(rebalance(node, rotations)), min)
        }
    }
}

/// Returns the computed height of the subtree
fn check_subtree<K: Ord + Debug, V>(
    link: &Link<K, V>,
    lower: Option<&K>,
    upper: Option<&K>,
    counted: &mut usize,
) -> Result<usize, InvariantError> {
    let Some(node) = link.as_deref() else {
        return Ok(0);
    };
    *counted += 1;

    let in_order = lower.is_none_or(|lo| *lo < node.key) && upper.is_none_or(|hi| node.key < *hi);
    if !in_order {
        return Err(InvariantError::OutOfOrder {
            key: format!("{:?}", node.key),
        });
    }

    let left = check_subtree(&node.left, lower, Some(&node.key), counted)?;
    let right = check_subtree(&node.right, Some(&node.key), upper, counted)?;
    let computed = 1 + left.max(right);

    if node.height != computed {
        return Err(InvariantError::HeightMismatch {
            key: format!("{:?}", node.key),
            stored: node.height,
            computed,
        });
    }

    let balance = left as i64 - right as i64;
    if !(-1..=1).contains(&balance) {
        return Err(InvariantError::Unbalanced {
            key: format!("{:?}", node.key),
            balance,
        });
    }

    Ok(computed)
}

/// In-order iterator over an [`AvlTree`]
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut link: Option<&'a Node<K, V>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((&node.key, &node.value))
    }
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nodes={} height={} LL={} LR={} RL={} RR={}",
            self.nodes,
            self.height,
            self.rotations.ll,
            self.rotations.lr,
            self.rotations.rl,
            self.rotations.rr
        )
    }
}
