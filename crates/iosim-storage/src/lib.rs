//! # iosim Storage
//!
//! Snapshot persistence for the iosim network simulator.
//!
//! ## Components
//!
//! - [`SnapshotIndex`]: Order-M B-tree from snapshot key to file location
//! - [`SnapshotConfig`]: The textual topology format (render and parse)
//! - [`SnapshotStore`]: Writes snapshot files and keeps them indexed
//!
//! ## Example
//!
//! ```rust,ignore
//! use iosim_storage::{SnapshotConfig, SnapshotStore};
//!
//! let mut store = SnapshotStore::new("./snapshots", 4)?;
//! store.save("lab1", &config)?;
//! let restored: SnapshotConfig = store.load("lab1")?;
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod persistent;

pub use config::{ConnectionConfig, DeviceConfig, InterfaceConfig, RouteConfig, SnapshotConfig};
pub use error::StorageError;
pub use index::{DEFAULT_ORDER, IndexStats, SnapshotIndex};
pub use persistent::SnapshotStore;
