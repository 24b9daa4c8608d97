//! # ptsync-metadata
//!
//! Metadata document handling for the PT synchronization pipeline:
//! structural validation (ISO 19139 / FGDC), publication-date rewriting with
//! pre-mutation backups, the configured catalog report, and the
//! [`MetadataStore`] import capability.

pub mod catalog;
pub mod document;
pub mod error;
pub mod store;

pub use catalog::{DateUpdate, DocumentStatus, MetadataCatalog};
pub use document::{backup_path, set_publication_date, MetadataDocument, MetadataFormat};
pub use error::MetadataError;
pub use store::MetadataStore;
