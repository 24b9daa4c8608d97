//! The phase state machine: phases 2 through 7 over the backend stores.
//!
//! Phases run strictly in ascending order under the orchestrator; each phase
//! method returns a [`PhaseOutcome`] and never propagates an error — internal
//! failures are logged and folded into the outcome. Worker-pool widths are
//! small per-phase literals, additionally clamped by the configured
//! `worker_threads` bound.
//!
//! Single-phase execution (operational recovery) skips upstream phases, so
//! phase preconditions are then the caller's responsibility.

use std::sync::Arc;

use chrono::NaiveDate;

use ptsync_core::config::Parameters;
use ptsync_core::types::{DatasetRef, RowFilter};
use ptsync_core::Settings;
use ptsync_metadata::{MetadataCatalog, MetadataStore};
use ptsync_store::GeoStore;

use crate::error::EngineError;
use crate::fanout::{run_parallel, Unit};
use crate::ops::SyncOperation;
use crate::phase::{FailureKind, OperationResult, Phase, PhaseOutcome};
use crate::plan::{DatasetPlan, RefreshSpec, LOOKUP_FIELDS};
use crate::plan::datasets;
use crate::retry::{with_retry, RetryPolicy};

/// Phase 2: the three refresh sub-pipelines run concurrently.
const REFRESH_POOL_WIDTH: usize = 3;
/// Phase 3: replication pairs are grouped into batches of this size.
const REPLICATION_BATCH_SIZE: usize = 3;
/// Phase 4: archive exports run with this pool width.
const ARCHIVE_POOL_WIDTH: usize = 4;
/// Phase 7: metadata imports run with this pool width.
const METADATA_POOL_WIDTH: usize = 4;

/// The multi-stage synchronization pipeline for one run.
pub struct SyncPipeline {
    store: Arc<dyn GeoStore>,
    metadata_store: Arc<dyn MetadataStore>,
    catalog: MetadataCatalog,
    plan: DatasetPlan,
    params: Parameters,
    retry: RetryPolicy,
    run_date: NaiveDate,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn GeoStore>,
        metadata_store: Arc<dyn MetadataStore>,
        settings: &Settings,
        run_date: NaiveDate,
    ) -> Self {
        Self {
            store,
            metadata_store,
            catalog: MetadataCatalog::new(
                settings.paths.metadata_dir.clone(),
                &settings.paths.metadata_files,
            ),
            plan: DatasetPlan::new(settings),
            params: settings.parameters.clone(),
            retry: RetryPolicy::default(),
            run_date,
        }
    }

    /// Override the retry policy (tests use millisecond backoff).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn plan(&self) -> &DatasetPlan {
        &self.plan
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    fn width(&self, literal: usize) -> usize {
        literal.clamp(1, self.params.worker_threads.max(1))
    }

    /// Execute one sync operation on the blocking pool.
    async fn execute_op(&self, op: SyncOperation) -> OperationResult {
        let results = run_parallel(
            1,
            vec![op.into_unit(self.store.clone(), self.retry.clone())],
        )
        .await;
        results
            .into_iter()
            .next()
            .map(Into::into)
            .unwrap_or_else(|| OperationResult::failed("<lost unit>", "no result"))
    }

    /// Run a named sequence of blocking steps as one outcome.
    async fn run_steps<F>(&self, phase: Phase, steps: F) -> PhaseOutcome
    where
        F: FnOnce() -> Vec<OperationResult> + Send + 'static,
    {
        match tokio::task::spawn_blocking(steps).await {
            Ok(operations) => PhaseOutcome::new(phase, operations),
            Err(join_err) => {
                tracing::error!(phase = phase.slug(), "phase worker panicked: {join_err}");
                PhaseOutcome::internal(phase, format!("phase worker panicked: {join_err}"))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 2 — staging refresh
    // -----------------------------------------------------------------------

    /// Refresh the staging feature sets: raw source pulls, the points and
    /// lands refresh sub-pipelines (concurrent, pool width 3), then the
    /// lands-table rebuild, which depends on a successful lands refresh.
    pub async fn staging_refresh(&self) -> PhaseOutcome {
        let phase = Phase::StagingRefresh;
        tracing::info!("=== Phase 2: {} ===", phase.title());

        let mut units = Vec::new();

        {
            let store = self.store.clone();
            let retry = self.retry.clone();
            let ops = self.plan.raw_source_exports();
            units.push(Unit::new("raw_source_exports", move || {
                let mut total = 0;
                for op in ops {
                    total += op.execute(store.as_ref(), &retry)?;
                }
                Ok(Some(total))
            }));
        }

        for spec in [self.plan.points_refresh(), self.plan.lands_refresh()] {
            let store = self.store.clone();
            let retry = self.retry.clone();
            let lookup = self.plan.lookup_table();
            let codes = self.params.active_status_codes.clone();
            let run_date = self.run_date;
            units.push(Unit::new(spec.label, move || {
                run_refresh(store.as_ref(), &retry, &spec, &lookup, &codes, run_date)
            }));
        }

        let results = run_parallel(self.width(REFRESH_POOL_WIDTH), units).await;
        let lands_ok = results
            .iter()
            .find(|r| r.key == "lands_refresh")
            .map(|r| r.ok())
            .unwrap_or(false);
        let mut operations: Vec<OperationResult> = results.into_iter().map(Into::into).collect();

        // True phase-internal dependency: the lands table is rebuilt from
        // the lands active view, never in parallel with the refresh.
        if lands_ok {
            let mut rebuild = self.execute_op(self.plan.lands_table_rebuild()).await;
            rebuild.key = "lands_table_rebuild".into();
            operations.push(rebuild);
        } else {
            operations.push(OperationResult::failed(
                "lands_table_rebuild",
                "skipped: lands refresh failed",
            ));
        }

        PhaseOutcome::new(phase, operations)
    }

    // -----------------------------------------------------------------------
    // Phase 3 — fan-out replication
    // -----------------------------------------------------------------------

    /// Replicate the staging views into replicated-production and
    /// production, in batches of three with idempotent replay semantics.
    ///
    /// Every source must exist before any replication begins; otherwise the
    /// phase fails with no partial work attempted.
    pub async fn replication(&self) -> PhaseOutcome {
        let phase = Phase::Replication;
        tracing::info!("=== Phase 3: {} ===", phase.title());

        let ops = self.plan.replication_pairs();

        let store = self.store.clone();
        let mut sources: Vec<DatasetRef> = Vec::new();
        for op in &ops {
            if !sources.contains(&op.source) {
                sources.push(op.source.clone());
            }
        }
        let probe = tokio::task::spawn_blocking(move || {
            let mut missing = Vec::new();
            for source in sources {
                match store.dataset_exists(&source) {
                    Ok(true) => {}
                    Ok(false) => missing.push(source.to_string()),
                    Err(err) => return Err(err),
                }
            }
            Ok(missing)
        })
        .await;

        let missing = match probe {
            Ok(Ok(missing)) => missing,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "replication precondition probe failed");
                return PhaseOutcome::internal(phase, err.to_string());
            }
            Err(join_err) => {
                return PhaseOutcome::internal(phase, format!("probe panicked: {join_err}"))
            }
        };
        if !missing.is_empty() {
            for source in &missing {
                tracing::error!("source does not exist: {source}");
            }
            return PhaseOutcome::precondition(
                phase,
                format!("missing replication sources: {}", missing.join(", ")),
            );
        }

        let mut operations = Vec::new();
        let mut aborted_after = None;
        for (index, batch) in ops.chunks(REPLICATION_BATCH_SIZE).enumerate() {
            tracing::info!(batch = index + 1, size = batch.len(), "running sync batch");
            let units: Vec<Unit> = batch
                .iter()
                .cloned()
                .map(|op| op.into_unit(self.store.clone(), self.retry.clone()))
                .collect();
            let results = run_parallel(self.width(batch.len()), units).await;
            let failed = results.iter().any(|r| !r.ok());
            operations.extend(results.into_iter().map(OperationResult::from));

            if failed {
                tracing::error!(batch = index + 1, "sync batch failed");
                if self.params.abort_on_batch_failure {
                    aborted_after = Some(index + 1);
                    break;
                }
            }
        }

        let outcome = PhaseOutcome::new(phase, operations);
        match aborted_after {
            Some(batch) => outcome.with_failure(
                FailureKind::Internal,
                format!("aborted after failed batch {batch} (abort_on_batch_failure)"),
            ),
            None => outcome,
        }
    }

    // -----------------------------------------------------------------------
    // Phase 4 — archival snapshot
    // -----------------------------------------------------------------------

    /// Rebuild the archive container and export the production datasets into
    /// it (pool width 4). The permit export applies the entity redaction.
    pub async fn archive_snapshot(&self) -> PhaseOutcome {
        let phase = Phase::ArchiveSnapshot;
        tracing::info!("=== Phase 4: {} ===", phase.title());

        let store = self.store.clone();
        let retry = self.retry.clone();
        let archive = self.plan.archive.clone();
        let reset = tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            with_retry(&retry, "archive_container_reset", || {
                store.delete_container(&archive)
            })?;
            with_retry(&retry, "archive_container_reset", || {
                store.create_container(&archive)
            })
        })
        .await;

        let mut operations = Vec::new();
        match reset {
            Ok(Ok(())) => operations.push(OperationResult::succeeded("archive_container_reset", None)),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "archive container reset failed");
                operations.push(OperationResult::failed("archive_container_reset", err.to_string()));
                return PhaseOutcome::new(phase, operations);
            }
            Err(join_err) => {
                return PhaseOutcome::internal(phase, format!("reset panicked: {join_err}"))
            }
        }

        let units: Vec<Unit> = self
            .plan
            .archive_exports(&self.params.redacted_entities)
            .into_iter()
            .map(|op| op.into_unit(self.store.clone(), self.retry.clone()))
            .collect();
        let results = run_parallel(self.width(ARCHIVE_POOL_WIDTH), units).await;
        operations.extend(results.into_iter().map(OperationResult::from));

        PhaseOutcome::new(phase, operations)
    }

    // -----------------------------------------------------------------------
    // Phase 5 — derived relationships
    // -----------------------------------------------------------------------

    /// Derive the issue year on the archived permit table and build the two
    /// permit relationship classes.
    pub async fn relationships(&self) -> PhaseOutcome {
        let phase = Phase::Relationships;
        tracing::info!("=== Phase 5: {} ===", phase.title());

        let store = self.store.clone();
        let retry = self.retry.clone();
        let permits = self.plan.archived(datasets::PERMITS);
        let specs = self.plan.permit_relationships();

        self.run_steps(phase, move || {
            let mut operations = Vec::new();

            match with_retry(&retry, "add_year_field", || store.add_year_field(&permits)) {
                Ok(rows) => operations.push(OperationResult::succeeded("add_year_field", Some(rows))),
                Err(err) => {
                    operations.push(OperationResult::failed("add_year_field", err.to_string()));
                    return operations;
                }
            }

            for spec in specs {
                let key = spec.name.to_string();
                match with_retry(&retry, &key, || store.create_relationship(&spec)) {
                    Ok(()) => operations.push(OperationResult::succeeded(key.as_str(), None)),
                    Err(err) => {
                        operations.push(OperationResult::failed(key.as_str(), err.to_string()));
                        return operations;
                    }
                }
            }

            operations
        })
        .await
    }

    /// Separately invocable phase-5 companion: the duplicate-location table
    /// over recently issued points, plus its relationship class.
    pub async fn duplicate_locations(&self) -> PhaseOutcome {
        let phase = Phase::Relationships;
        tracing::info!("building duplicate-location table");

        let store = self.store.clone();
        let retry = self.retry.clone();
        let source = self.plan.archived(datasets::PT_POINTS_ALL);
        let target = self.plan.archived(datasets::POINTS_IDENTICAL);
        let spec = self.plan.identical_points_relationship();
        let cutoff = self.run_date - chrono::Duration::days(365 * i64::from(self.params.lookback_years));

        self.run_steps(phase, move || {
            let mut operations = Vec::new();
            let filter = RowFilter::IssuedOnOrAfter { date: cutoff };

            match with_retry(&retry, "find_identical_points", || {
                store.find_identical(&source, &target, &filter)
            }) {
                Ok(rows) => {
                    operations.push(OperationResult::succeeded("find_identical_points", Some(rows)))
                }
                Err(err) => {
                    operations.push(OperationResult::failed("find_identical_points", err.to_string()));
                    return operations;
                }
            }

            let key = spec.name.to_string();
            match with_retry(&retry, &key, || store.create_relationship(&spec)) {
                Ok(()) => operations.push(OperationResult::succeeded(key.as_str(), None)),
                Err(err) => operations.push(OperationResult::failed(key.as_str(), err.to_string())),
            }
            operations
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Phase 6 — public export
    // -----------------------------------------------------------------------

    /// Export the public download files from the archive.
    pub async fn public_export(&self) -> PhaseOutcome {
        let phase = Phase::PublicExport;
        tracing::info!("=== Phase 6: {} ===", phase.title());

        let store = self.store.clone();
        let retry = self.retry.clone();
        let points = self.plan.archived(datasets::PT_POINTS);
        let lands_table = self.plan.archived(datasets::PT_LANDS_TABLE);
        let points_file = self.plan.public_points_file();
        let lands_file = self.plan.public_lands_file();

        self.run_steps(phase, move || {
            let mut operations = Vec::new();

            match with_retry(&retry, "public_points_export", || {
                store.export_interchange(&points, &points_file)
            }) {
                Ok(rows) => {
                    operations.push(OperationResult::succeeded("public_points_export", Some(rows)))
                }
                Err(err) => {
                    operations.push(OperationResult::failed("public_points_export", err.to_string()));
                    return operations;
                }
            }

            match with_retry(&retry, "public_lands_export", || {
                store.export_table_file(&lands_table, &lands_file)
            }) {
                Ok(rows) => {
                    operations.push(OperationResult::succeeded("public_lands_export", Some(rows)))
                }
                Err(err) => {
                    operations.push(OperationResult::failed("public_lands_export", err.to_string()))
                }
            }
            operations
        })
        .await
    }

    /// Config-gated phase-6 step: one annual summary per distinct issue
    /// year present in the archived permit table.
    pub async fn summary_tables(&self) -> PhaseOutcome {
        let phase = Phase::PublicExport;
        tracing::info!("building annual summary tables");

        let store = self.store.clone();
        let retry = self.retry.clone();
        let permits = self.plan.archived(datasets::PERMITS);
        let plan = self.plan.clone();

        self.run_steps(phase, move || {
            let mut operations = Vec::new();

            let years = match with_retry(&retry, "distinct_years", || store.distinct_years(&permits))
            {
                Ok(years) => years,
                Err(err) => {
                    operations.push(OperationResult::failed("distinct_years", err.to_string()));
                    return operations;
                }
            };

            for year in years {
                let key = format!("summary_{year}");
                let path = plan.summary_table_file(year);
                match with_retry(&retry, &key, || {
                    store.write_summary_table(&permits, &path, year)
                }) {
                    Ok(groups) => operations.push(OperationResult::succeeded(key.as_str(), Some(groups))),
                    Err(err) => {
                        operations.push(OperationResult::failed(key.as_str(), err.to_string()));
                        return operations;
                    }
                }
            }
            operations
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Phase 7 — promotion + metadata
    // -----------------------------------------------------------------------

    /// Replace the archive mirror with a full-store copy.
    pub async fn promotion(&self) -> PhaseOutcome {
        let phase = Phase::Promotion;
        tracing::info!("=== Phase 7: {} ===", phase.title());

        let store = self.store.clone();
        let retry = self.retry.clone();
        let archive = self.plan.archive.clone();
        let mirror = self.plan.mirror.clone();

        self.run_steps(phase, move || {
            let mut operations = Vec::new();

            match with_retry(&retry, "mirror_reset", || store.delete_container(&mirror)) {
                Ok(()) => operations.push(OperationResult::succeeded("mirror_reset", None)),
                Err(err) => {
                    operations.push(OperationResult::failed("mirror_reset", err.to_string()));
                    return operations;
                }
            }

            match with_retry(&retry, "mirror_copy", || {
                store.copy_container(&archive, &mirror)
            }) {
                Ok(()) => operations.push(OperationResult::succeeded("mirror_copy", None)),
                Err(err) => operations.push(OperationResult::failed("mirror_copy", err.to_string())),
            }
            operations
        })
        .await
    }

    /// Batch-import metadata documents across all three database
    /// environments (pool width 4).
    pub async fn metadata_import(&self) -> PhaseOutcome {
        let phase = Phase::Promotion;
        let mappings = self.plan.metadata_mappings(&self.catalog);
        tracing::info!(count = mappings.len(), "starting batch metadata import");

        let units: Vec<Unit> = mappings
            .into_iter()
            .map(|(dataset, document)| {
                let metadata_store = self.metadata_store.clone();
                let key = format!("metadata {dataset}");
                Unit::new(key, move || {
                    metadata_store
                        .import_document(&dataset, &document)
                        .map_err(EngineError::from)
                        .map(|()| None)
                })
            })
            .collect();

        let results = run_parallel(self.width(METADATA_POOL_WIDTH), units).await;
        let ok = results.iter().filter(|r| r.ok()).count();
        tracing::info!("batch metadata import completed: {ok}/{} successful", results.len());
        PhaseOutcome::from_units(phase, results)
    }

    /// Rewrite the publication date on every configured metadata document.
    pub async fn metadata_dates(&self) -> PhaseOutcome {
        let phase = Phase::Promotion;
        let catalog = self.catalog.clone();
        let run_date = self.run_date;
        let force = self.params.force_metadata_update;

        self.run_steps(phase, move || {
            catalog
                .update_all_dates(run_date, force)
                .into_iter()
                .map(|update| OperationResult {
                    key: format!("dates {}", update.filename),
                    rows: None,
                    error: update.error,
                })
                .collect()
        })
        .await
    }
}

/// One parametrized feature refresh: export the working copy, run the code
/// lookup rewrites, then derive the All and Active views.
///
/// Returns the Active view row count.
fn run_refresh(
    store: &dyn GeoStore,
    retry: &RetryPolicy,
    spec: &RefreshSpec,
    lookup: &DatasetRef,
    active_codes: &[Option<String>],
    run_date: NaiveDate,
) -> Result<Option<u64>, EngineError> {
    tracing::info!(refresh = spec.label, source = %spec.source, "starting feature refresh");

    SyncOperation::replace(spec.source.clone(), spec.working.clone(), None)
        .execute(store, retry)?;

    for field in LOOKUP_FIELDS {
        with_retry(retry, &format!("{} lookup {field}", spec.label), || {
            store.rewrite_lookup_field(&spec.working, field, lookup)
        })?;
    }

    SyncOperation::replace(
        spec.working.clone(),
        spec.all_view.clone(),
        Some(RowFilter::StatusIn {
            codes: active_codes.to_vec(),
        }),
    )
    .execute(store, retry)?;

    let active = SyncOperation::replace(
        spec.all_view.clone(),
        spec.active_view.clone(),
        Some(RowFilter::ExpiresOnOrAfter { date: run_date }),
    )
    .execute(store, retry)?;

    Ok(Some(active))
}
