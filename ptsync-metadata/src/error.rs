//! Error types for ptsync-metadata.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from metadata document handling.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The document file is missing.
    #[error("metadata file does not exist: {path}")]
    MissingFile { path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed XML.
    #[error("XML error in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    /// The document parsed but is not a recognized metadata format.
    #[error("unrecognized metadata format in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    /// A failure while writing the rewritten document.
    #[error("failed to rewrite {path}: {reason}")]
    Rewrite { path: PathBuf, reason: String },

    /// A downstream import failure reported by the backing store.
    #[error("metadata import failed for {target}: {reason}")]
    Import { target: String, reason: String },
}

/// Convenience constructor for [`MetadataError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> MetadataError {
    MetadataError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`MetadataError::Xml`].
pub(crate) fn xml_err(path: impl Into<PathBuf>, source: quick_xml::Error) -> MetadataError {
    MetadataError::Xml {
        path: path.into(),
        source,
    }
}
