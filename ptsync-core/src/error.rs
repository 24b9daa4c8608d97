//! Error types for ptsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON (or fails schema checks).
    #[error("invalid settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A semantic validation failure (bad path, out-of-range parameter, ...).
    #[error("configuration invalid: {reason}")]
    Invalid { reason: String },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`ConfigError::Invalid`].
pub(crate) fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}
