//! # ptsync-store
//!
//! The backend storage capability for the PT synchronization pipeline.
//!
//! [`GeoStore`] is the narrow seam the engine drives: existence/row-count
//! probes, filtered exports with replace semantics, truncate/append,
//! whole-container operations, lookup-driven field rewrites, and the derived
//! artifacts (year field, duplicate-location table, relationship classes,
//! public export files, annual summaries). All methods are blocking and
//! fallible; implementations must be callable from multiple worker threads,
//! and every call names its stores explicitly — there is no ambient
//! "current workspace".
//!
//! [`FileGeoStore`] is the file-backed reference implementation used by the
//! CLI and the test-suite.

pub mod error;
pub mod file;

use std::path::Path;

use ptsync_core::types::{DatasetRef, RelationshipSpec, RowFilter, SchemaMode, StoreId, StoreStatus};

pub use error::StoreError;
pub use file::FileGeoStore;

/// The backend storage capability.
pub trait GeoStore: Send + Sync {
    fn dataset_exists(&self, dataset: &DatasetRef) -> Result<bool, StoreError>;

    fn row_count(&self, dataset: &DatasetRef) -> Result<u64, StoreError>;

    /// Export source rows (optionally filtered) into `target`, replacing it.
    /// Returns the exported row count.
    fn export_rows(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        filter: Option<&RowFilter>,
    ) -> Result<u64, StoreError>;

    /// Remove every row of `target` while preserving its schema and any
    /// artifacts built on it.
    fn truncate(&self, dataset: &DatasetRef) -> Result<(), StoreError>;

    /// Append all source rows into `target`. Returns the appended row count.
    fn append_rows(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        mode: SchemaMode,
    ) -> Result<u64, StoreError>;

    /// Create a file container (no-op when it already exists).
    fn create_container(&self, container: &Path) -> Result<(), StoreError>;

    /// Delete a file container and everything in it (no-op when absent).
    fn delete_container(&self, container: &Path) -> Result<(), StoreError>;

    /// Copy a whole container, datasets and derived artifacts included.
    fn copy_container(&self, source: &Path, target: &Path) -> Result<(), StoreError>;

    /// Substitute `field` values through a CODE_VALUE→DESCRIPTION lookup
    /// dataset. Returns the number of rewritten rows.
    fn rewrite_lookup_field(
        &self,
        dataset: &DatasetRef,
        field: &str,
        lookup: &DatasetRef,
    ) -> Result<u64, StoreError>;

    /// Derive `YEAR_ISSUED` from `DATE_ISSUED` on every row. Returns the
    /// number of rows that received a year.
    fn add_year_field(&self, dataset: &DatasetRef) -> Result<u64, StoreError>;

    fn distinct_years(&self, dataset: &DatasetRef) -> Result<Vec<i32>, StoreError>;

    /// Build the duplicate-location table: rows of `source` matching
    /// `filter` whose SHAPE value occurs more than once, written to `target`
    /// with IN_FID back-references. Returns the duplicate row count.
    fn find_identical(
        &self,
        source: &DatasetRef,
        target: &DatasetRef,
        filter: &RowFilter,
    ) -> Result<u64, StoreError>;

    /// Build a one-to-many relationship class artifact.
    fn create_relationship(&self, spec: &RelationshipSpec) -> Result<(), StoreError>;

    /// Export a feature dataset to an interchange file for public download.
    fn export_interchange(&self, source: &DatasetRef, path: &Path) -> Result<u64, StoreError>;

    /// Export a plain table to a legacy tabular file for public download.
    fn export_table_file(&self, source: &DatasetRef, path: &Path) -> Result<u64, StoreError>;

    /// Write one annual summary (permit count + acre-feet total grouped by
    /// year/purpose/county) for `year`. Returns the group count.
    fn write_summary_table(
        &self,
        source: &DatasetRef,
        path: &Path,
        year: i32,
    ) -> Result<u64, StoreError>;

    /// Probe a store for the execution report. Infallible by design: a
    /// broken store is reported, not raised.
    fn verify_store(&self, store: &StoreId) -> StoreStatus;
}
