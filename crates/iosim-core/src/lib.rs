//! # iosim Core
//!
//! Core types, addressing helpers, events and errors shared by every crate
//! of the iosim network simulator.
//!
//! ## Key Types
//!
//! - [`Packet`]: A simulated IPv4 packet queued on a device interface
//! - [`NetworkEvent`]: A drop or fault recorded while the simulation runs
//! - [`EventLog`]: Bounded FIFO of [`NetworkEvent`]s with per-kind counters
//! - [`IosimError`]: Top-level error type
//!
//! ## Addressing
//!
//! Routes and policies are expressed as a dotted-quad prefix plus a
//! dotted-quad mask. The helpers in [`addr`] convert masks to prefix lengths
//! and build the `"prefix/length"` route keys used by the routing table.

pub mod addr;
pub mod error;
pub mod event;
pub mod packet;

// Re-export main types
pub use addr::*;
pub use error::*;
pub use event::*;
pub use packet::*;
