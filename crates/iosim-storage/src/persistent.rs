//! File-backed snapshot persistence
//!
//! [`SnapshotStore`] writes each snapshot to `<dir>/<key>.cfg` and keeps a
//! [`SnapshotIndex`] from key to file path so lookups never touch the
//! directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::error::StorageError;
use crate::index::{IndexStats, SnapshotIndex};

/// File extension of stored snapshots
pub const SNAPSHOT_EXTENSION: &str = "cfg";

/// Snapshot files on disk, indexed by key
#[derive(Debug)]
pub struct SnapshotStore {
    /// Directory holding the snapshot files
    dir: PathBuf,
    /// Key to file path
    index: SnapshotIndex<String, String>,
}

impl SnapshotStore {
    /// Create a store rooted at `dir` with an empty index
    ///
    /// The directory is created lazily on the first save.
    pub fn new(dir: impl Into<PathBuf>, order: usize) -> Result<Self, StorageError> {
        Ok(Self {
            dir: dir.into(),
            index: SnapshotIndex::new(order)?,
        })
    }

    /// Create a store and index every snapshot file already in `dir`
    pub fn open(dir: impl Into<PathBuf>, order: usize) -> Result<Self, StorageError> {
        let mut store = Self::new(dir, order)?;
        if !store.dir.exists() {
            return Ok(store);
        }

        for entry in fs::read_dir(&store.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                store.index.insert(key.to_string(), path.display().to_string());
            }
        }
        info!(dir = %store.dir.display(), snapshots = store.index.len(), "opened snapshot store");
        Ok(store)
    }

    /// Key derived from the current time, `snapshot_<unix seconds>`
    pub fn generate_key() -> String {
        format!("snapshot_{}", Utc::now().timestamp())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot and index it, returning the file path
    pub fn save(&mut self, key: &str, config: &SnapshotConfig) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(format!("{key}.{SNAPSHOT_EXTENSION}"));
        let contents = format!(
            "# iosim snapshot {key} saved {}\n{}",
            Utc::now().to_rfc3339(),
            config.render()
        );
        fs::write(&path, contents)?;

        self.index.insert(key.to_string(), path.display().to_string());
        info!(key, path = %path.display(), devices = config.devices.len(), "snapshot saved");
        Ok(path)
    }

    /// Read and parse an indexed snapshot
    pub fn load(&self, key: &str) -> Result<SnapshotConfig, StorageError> {
        let path = self.index.search(key).ok_or_else(|| StorageError::not_found(key))?;
        debug!(key, path, "loading snapshot");
        let text = fs::read_to_string(path)?;
        SnapshotConfig::parse(&text)
    }

    /// Indexed keys and paths in key order
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.index
            .all_entries()
            .into_iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Drop a snapshot from the index and delete its file
    ///
    /// Returns whether the key was indexed.
    pub fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        let Some(path) = self.index.delete(key) else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key, path, "snapshot file already gone");
            }
            Err(e) => return Err(e.into()),
        }
        debug!(key, "snapshot removed");
        Ok(true)
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn index(&self) -> &SnapshotIndex<String, String> {
        &self.index
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
