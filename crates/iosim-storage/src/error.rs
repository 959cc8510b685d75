//! Error types for iosim-storage
//!
//! This module defines the error types used throughout the storage crate.

use iosim_core::AddressError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested snapshot was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Snapshot key that cannot be used as a file name
    #[error("Invalid snapshot key: {0:?}")]
    InvalidKey(String),

    /// B-tree order below the supported minimum
    #[error("Invalid index order {0}, must be at least 3")]
    InvalidOrder(usize),

    /// Malformed line in a snapshot configuration
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Bad address inside a snapshot configuration
    #[error("Address error on line {line}: {source}")]
    Address {
        line: usize,
        #[source]
        source: AddressError,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
