//! Error taxonomy for backend store operations.
//!
//! The split matters to the retry layer: precondition failures (missing
//! dataset/store, corrupt data) are deterministic and must never consume
//! retry budget; I/O and backend faults are transient and may be retried.

use std::path::PathBuf;

use thiserror::Error;

use ptsync_core::types::DatasetRef;

/// All errors that can arise from [`GeoStore`](crate::GeoStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required dataset does not exist. Precondition; never retried.
    #[error("dataset does not exist: {dataset}")]
    MissingDataset { dataset: DatasetRef },

    /// A file container (archive store, mirror) does not exist.
    /// Precondition; never retried.
    #[error("store container does not exist: {path}")]
    MissingContainer { path: PathBuf },

    /// A dataset file exists but cannot be interpreted. Precondition.
    #[error("corrupt dataset at {path}: {reason}")]
    Data { path: PathBuf, reason: String },

    /// An I/O fault talking to the backing store. Transient.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other backend fault. Transient.
    #[error("backend error: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    /// Whether retrying the same call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Backend { .. })
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`StoreError::MissingDataset`].
pub(crate) fn missing(dataset: &DatasetRef) -> StoreError {
    StoreError::MissingDataset {
        dataset: dataset.clone(),
    }
}
