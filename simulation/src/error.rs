//! Errors surfaced by the network controller

use std::path::PathBuf;

use iosim_core::{AddressError, DeviceError, InvariantError};
use iosim_storage::StorageError;
use thiserror::Error;

/// Umbrella error for [`Network`](crate::Network) operations
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("Failed to read config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl NetworkError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
