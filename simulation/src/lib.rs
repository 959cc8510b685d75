//! # iosim
//!
//! A discrete-tick simulator of small IPv4 networks built from routers,
//! switches, hosts and firewalls.
//!
//! ## Overview
//!
//! Every device owns three structures:
//!
//! - **Routing table**: an AVL tree keyed by `"prefix/length"` strings,
//!   looked up from /32 down to /0
//! - **Policy index**: an octet trie answering longest-prefix matches with a
//!   block rule or a TTL floor
//! - **Resolution cache**: next hop to egress interface, learned lazily
//!
//! The network controller also keeps a B-tree index of saved topology
//! snapshots and a bounded event log of packet drops.
//!
//! ## Architecture
//!
//! - **Device** (`device.rs`): interfaces, queues, counters, per-device structures
//! - **Engine** (`engine.rs`): the per-tick forwarding pipeline
//! - **Network** (`network.rs`): devices, links, ticks, snapshots
//! - **Scenarios** (`scenarios.rs`): pre-built demonstrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use iosim_simulation::*;
//!
//! let mut net = Network::new(SimConfig::default())?;
//! scenarios::build_lab(&mut net)?;
//!
//! // A packet with TTL 1 leaves PC1 and expires in the same tick
//! net.send_packet("192.168.1.10".parse()?, "192.168.2.10".parse()?, "hi", Some(1))?;
//! let report = net.tick();
//! assert_eq!(report.drops(DropReason::TtlExpired), 1);
//! ```

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod network;
pub mod scenarios;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use config::SimConfig;
pub use device::{Device, DeviceKind, DeviceStats, Interface, LinkEnd, PacketCounters};
pub use engine::{ForwardOutcome, ForwardingEngine, TickReport, Transmission};
pub use error::NetworkError;
pub use network::{Network, NetworkStats};

// Re-export core types for callers driving the simulation
pub use iosim_core::{DropReason, EventKind, Packet, PacketId, Severity};
