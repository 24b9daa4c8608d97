//! Declarative sync operations and their execution against a [`GeoStore`].

use std::sync::Arc;

use ptsync_core::types::{DatasetRef, RowFilter, SchemaMode, SyncMode};
use ptsync_store::{GeoStore, StoreError};

use crate::error::EngineError;
use crate::fanout::Unit;
use crate::retry::{with_retry, RetryPolicy};

/// One source→target data movement with a mode and an optional row filter.
///
/// The filter applies to `Replace` exports; replication modes move the
/// source verbatim.
#[derive(Debug, Clone)]
pub struct SyncOperation {
    pub source: DatasetRef,
    pub target: DatasetRef,
    pub filter: Option<RowFilter>,
    pub mode: SyncMode,
}

impl SyncOperation {
    pub fn replace(source: DatasetRef, target: DatasetRef, filter: Option<RowFilter>) -> Self {
        Self {
            source,
            target,
            filter,
            mode: SyncMode::Replace,
        }
    }

    pub fn refresh(source: DatasetRef, target: DatasetRef) -> Self {
        Self {
            source,
            target,
            filter: None,
            mode: SyncMode::CreateOrRefresh,
        }
    }

    /// Stable key for logs, fan-out results, and the execution report.
    pub fn key(&self) -> String {
        format!("{} -> {}", self.source, self.target)
    }

    /// Execute against the store, retrying each backend call.
    ///
    /// Returns the number of rows now present in the target.
    pub fn execute(&self, store: &dyn GeoStore, retry: &RetryPolicy) -> Result<u64, EngineError> {
        let key = self.key();
        match self.mode {
            SyncMode::Replace => with_retry(retry, &key, || {
                store.export_rows(&self.source, &self.target, self.filter.as_ref())
            }),
            SyncMode::TruncateThenAppend => {
                with_retry(retry, &key, || store.truncate(&self.target))?;
                with_retry(retry, &key, || {
                    store.append_rows(&self.source, &self.target, SchemaMode::Unchecked)
                })
            }
            SyncMode::CreateOrRefresh => {
                // The source check comes first: an existing target must not
                // be truncated when there is nothing to append.
                let source_exists =
                    with_retry(retry, &key, || store.dataset_exists(&self.source))?;
                if !source_exists {
                    return Err(EngineError::Store(StoreError::MissingDataset {
                        dataset: self.source.clone(),
                    }));
                }
                let exists = with_retry(retry, &key, || store.dataset_exists(&self.target))?;
                if exists {
                    with_retry(retry, &key, || store.truncate(&self.target))?;
                    with_retry(retry, &key, || {
                        store.append_rows(&self.source, &self.target, SchemaMode::Unchecked)
                    })
                } else {
                    // First run: create the target with a full copy.
                    with_retry(retry, &key, || {
                        store.export_rows(&self.source, &self.target, None)
                    })
                }
            }
        }
    }

    /// Bundle into a fan-out unit.
    pub fn into_unit(self, store: Arc<dyn GeoStore>, retry: RetryPolicy) -> Unit {
        let key = self.key();
        Unit::new(key, move || {
            self.execute(store.as_ref(), &retry).map(Some)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
