//! Simulation configuration

use std::fs;
use std::path::{Path, PathBuf};

use iosim_core::{DEFAULT_EVENT_LOG_CAPACITY, DEFAULT_TTL};
use iosim_storage::DEFAULT_ORDER;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Configuration for the simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Order of the snapshot index B-tree
    pub snapshot_order: usize,
    /// Directory snapshot files are written to
    pub snapshot_dir: PathBuf,
    /// TTL given to packets sent without an explicit one
    pub default_ttl: u8,
    /// Entries retained by the event log before the oldest is evicted
    pub event_log_capacity: usize,
    /// Enable detailed tracing of each forwarding stage
    pub trace_forwarding: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            snapshot_order: DEFAULT_ORDER,
            snapshot_dir: PathBuf::from("./snapshots"),
            default_ttl: DEFAULT_TTL,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            trace_forwarding: true,
        }
    }
}

impl SimConfig {
    /// Load a configuration from a JSON file
    ///
    /// Fields missing from the file keep their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NetworkError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| NetworkError::config(path, e))?;
        serde_json::from_str(&text).map_err(|e| NetworkError::config(path, e))
    }

    /// Same configuration with snapshots stored under `dir`
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }
}
