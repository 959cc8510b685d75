//! # iosim Routing
//!
//! Per-device forwarding state for the iosim network simulator.
//!
//! ## Components
//!
//! - [`AvlTree`]: Height-balanced ordered map with per-case rotation counters
//! - [`RoutingTable`]: Route entries keyed by `"network/len"`, with
//!   most-specific-first lookup
//! - [`PolicyIndex`]: Octet trie of block / TTL-floor policies with
//!   longest-prefix match
//!
//! Every structure here is owned by exactly one device and mutated only from
//! the single simulation thread.

pub mod avl;
pub mod policy;
pub mod table;

pub use avl::{AvlTree, RotationCounts, TreeStats};
pub use policy::{Policy, PolicyIndex, PolicyStats};
pub use table::{Route, RoutingTable};
