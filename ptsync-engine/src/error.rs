//! Error types for ptsync-engine.

use std::path::PathBuf;

use thiserror::Error;

use ptsync_core::ConfigError;
use ptsync_metadata::MetadataError;
use ptsync_store::StoreError;

/// All errors that can arise from pipeline execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend store failure (precondition or transient).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A metadata document failure.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// A configuration failure during initialization.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A transient operation kept failing until the retry budget ran out.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// An environment prerequisite check failed during initialization.
    #[error("prerequisite check failed: {0}")]
    Prerequisite(String),

    /// `--phase-only` was given a number outside 2..=7.
    #[error("invalid phase number: {number}")]
    InvalidPhase { number: u8 },

    /// The execution report could not be written.
    #[error("failed to write report at {path}: {reason}")]
    Report { path: PathBuf, reason: String },
}
