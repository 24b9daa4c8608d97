//! The metadata import capability.

use std::path::Path;

use ptsync_core::types::DatasetRef;

use crate::error::MetadataError;

/// Imports metadata documents onto datasets.
///
/// Implementations must validate the document structurally before importing;
/// an invalid document is never attached to a dataset.
pub trait MetadataStore: Send + Sync {
    fn import_document(&self, dataset: &DatasetRef, document: &Path) -> Result<(), MetadataError>;
}
