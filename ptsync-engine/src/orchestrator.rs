//! Drives the pipeline phases in order, owns the run's result map and
//! wall-clock timing, and produces the execution report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{Local, NaiveDate};

use ptsync_core::types::{Environment, StoreId, StoreStatus};
use ptsync_core::Settings;
use ptsync_store::{FileGeoStore, GeoStore};

use crate::error::EngineError;
use crate::phase::{Phase, PhaseOutcome};
use crate::pipeline::SyncPipeline;
use crate::report::ExecutionReport;
use crate::retry::RetryPolicy;

const TEMP_FILE_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// The workflow orchestrator. Owns one run's outcome map; phase results are
/// accumulated for the run's lifetime and consumed only by the report.
pub struct Orchestrator {
    settings: Settings,
    store: Arc<FileGeoStore>,
    pipeline: SyncPipeline,
    results: BTreeMap<String, PhaseOutcome>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load and validate configuration, construct the stores, and verify
    /// environment prerequisites. Fails closed on any issue.
    pub fn initialize(config_path: &Path, run_date: NaiveDate) -> Result<Self, EngineError> {
        tracing::info!("initializing PT sync orchestrator");
        let settings = Settings::load(config_path)?;
        tracing::info!("configuration validated");

        let store = Arc::new(FileGeoStore::new(&settings.connections));
        let pipeline = SyncPipeline::new(store.clone(), store.clone(), &settings, run_date);

        let orchestrator = Self {
            settings,
            store,
            pipeline,
            results: BTreeMap::new(),
        };

        let issues = orchestrator.validate_prerequisites();
        if !issues.is_empty() {
            for issue in &issues {
                tracing::error!("prerequisite issue: {issue}");
            }
            return Err(EngineError::Prerequisite(issues.join("; ")));
        }

        tracing::info!("orchestrator initialized");
        Ok(orchestrator)
    }

    /// Override the retry policy (tests use millisecond backoff).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.pipeline = self.pipeline.with_retry_policy(retry);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn results(&self) -> &BTreeMap<String, PhaseOutcome> {
        &self.results
    }

    /// Store connectivity, required source datasets, and workspace
    /// writability. Returns the list of issues; empty means ready.
    pub fn validate_prerequisites(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for env in Environment::all() {
            let status = self.store.verify_store(&StoreId::Env(env));
            if !status.connected {
                issues.push(format!("cannot connect to {env}: {}", status.detail));
            }
        }

        for dataset in self.pipeline.plan().required_sources() {
            match self.store.dataset_exists(&dataset) {
                Ok(true) => {}
                Ok(false) => issues.push(format!("required dataset missing: {dataset}")),
                Err(err) => issues.push(format!("cannot probe {dataset}: {err}")),
            }
        }

        for dir in self.writable_dirs() {
            if let Err(err) = probe_writable(&dir) {
                issues.push(format!("workspace not writable at {}: {err}", dir.display()));
            }
        }

        issues
    }

    fn writable_dirs(&self) -> Vec<PathBuf> {
        let paths = &self.settings.paths;
        let mut dirs = vec![
            paths.summary_tables_dir.clone(),
            paths.public_download_dir.clone(),
            paths.report_dir.clone(),
        ];
        if let Some(parent) = paths.archive_store.parent() {
            dirs.push(parent.to_path_buf());
        }
        dirs
    }

    // -----------------------------------------------------------------------
    // Full workflow
    // -----------------------------------------------------------------------

    /// Run phases 2–7 in order, skipping any number in `skip_phases`.
    /// Always writes the execution report, even on failure.
    pub async fn execute_full_workflow(&mut self, skip_phases: &[u8]) -> bool {
        let started = Instant::now();
        let started_at = Local::now();
        tracing::info!("starting PT sync full workflow");

        for phase in Phase::all() {
            if skip_phases.contains(&phase.number()) {
                tracing::info!("skipping phase {}: {}", phase.number(), phase.title());
                continue;
            }
            self.run_phase(phase).await;
        }

        let overall = !self.results.is_empty() && self.results.values().all(PhaseOutcome::success);

        self.generate_report(started_at, started.elapsed()).await;

        if overall {
            tracing::info!("PT sync workflow completed successfully");
        } else {
            tracing::error!("PT sync workflow completed with errors");
        }
        overall
    }

    async fn run_phase(&mut self, phase: Phase) {
        match phase {
            Phase::StagingRefresh => {
                let outcome = self.pipeline.staging_refresh().await;
                self.record(phase.slug(), outcome);
            }
            Phase::Replication => {
                let outcome = self.pipeline.replication().await;
                self.record(phase.slug(), outcome);
            }
            Phase::ArchiveSnapshot => {
                let outcome = self.pipeline.archive_snapshot().await;
                self.record(phase.slug(), outcome);
            }
            Phase::Relationships => {
                let outcome = self.pipeline.relationships().await;
                self.record(phase.slug(), outcome);
            }
            Phase::PublicExport => {
                let outcome = self.pipeline.public_export().await;
                self.record(phase.slug(), outcome);
                if !self.settings.parameters.skip_summary_tables {
                    let summaries = self.pipeline.summary_tables().await;
                    self.record("phase_6_summary_tables", summaries);
                }
            }
            Phase::Promotion => {
                let outcome = self.pipeline.promotion().await;
                self.record(phase.slug(), outcome);
                let imports = self.pipeline.metadata_import().await;
                self.record("phase_7_metadata", imports);
                let dates = self.pipeline.metadata_dates().await;
                self.record("phase_7_metadata_dates", dates);
            }
        }
    }

    fn record(&mut self, key: impl Into<String>, outcome: PhaseOutcome) {
        let key = key.into();
        if outcome.success() {
            tracing::info!("{key}: ok");
        } else {
            tracing::error!("{key}: failed");
        }
        self.results.insert(key, outcome);
    }

    // -----------------------------------------------------------------------
    // Single-phase execution (operational recovery)
    // -----------------------------------------------------------------------

    /// Execute exactly one phase. Upstream preconditions are the operator's
    /// responsibility. Phases 5, 6, and 7 chain their companion sub-steps.
    pub async fn execute_phase_only(&mut self, number: u8) -> bool {
        let Some(phase) = Phase::from_number(number) else {
            tracing::error!("invalid phase number: {number}");
            return false;
        };
        tracing::info!("executing phase {number} only: {}", phase.title());

        match phase {
            Phase::Relationships => {
                let outcome = self.pipeline.relationships().await;
                let ok = outcome.success();
                self.record(phase.slug(), outcome);
                if !ok {
                    return false;
                }
                let duplicates = self.pipeline.duplicate_locations().await;
                let ok = duplicates.success();
                self.record("phase_5_duplicate_locations", duplicates);
                ok
            }
            Phase::PublicExport => {
                let outcome = self.pipeline.public_export().await;
                let ok = outcome.success();
                self.record(phase.slug(), outcome);
                if !ok {
                    return false;
                }
                if self.settings.parameters.skip_summary_tables {
                    return true;
                }
                let summaries = self.pipeline.summary_tables().await;
                let ok = summaries.success();
                self.record("phase_6_summary_tables", summaries);
                ok
            }
            Phase::Promotion => {
                let outcome = self.pipeline.promotion().await;
                let ok = outcome.success();
                self.record(phase.slug(), outcome);
                if !ok {
                    return false;
                }
                let imports = self.pipeline.metadata_import().await;
                let ok = imports.success();
                self.record("phase_7_metadata", imports);
                ok
            }
            _ => {
                self.run_phase(phase).await;
                self.results
                    .get(phase.slug())
                    .map(PhaseOutcome::success)
                    .unwrap_or(false)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dry run
    // -----------------------------------------------------------------------

    /// Read-only validation: prerequisites, metadata documents, current
    /// record counts, and what each phase would do. Mutates nothing.
    pub async fn dry_run(&self) -> bool {
        tracing::info!("starting DRY RUN — no data will be modified");

        let issues = self.validate_prerequisites();
        if !issues.is_empty() {
            tracing::error!("dry run failed — prerequisite issues found:");
            for issue in &issues {
                tracing::error!("  - {issue}");
            }
            return false;
        }

        tracing::info!("validating metadata documents");
        for status in self.pipeline.catalog().validate_all() {
            if status.valid {
                tracing::info!("  {} ok", status.filename);
            } else {
                tracing::warn!(
                    "  invalid metadata file {}: {}",
                    status.filename,
                    status.error.unwrap_or_default()
                );
            }
        }

        tracing::info!("current record counts:");
        for (name, count) in self.data_counts().await {
            tracing::info!("  {name}: {count}");
        }

        for phase in Phase::all() {
            tracing::info!(
                "would execute phase {}: {}",
                phase.number(),
                phase.title()
            );
        }

        tracing::info!("dry run completed — all validations passed");
        true
    }

    // -----------------------------------------------------------------------
    // Report + cleanup
    // -----------------------------------------------------------------------

    async fn data_counts(&self) -> BTreeMap<String, i64> {
        let store = self.store.clone();
        let monitored = self.pipeline.plan().monitored_datasets();
        tokio::task::spawn_blocking(move || {
            let mut counts = BTreeMap::new();
            for (name, dataset) in monitored {
                let count = match store.dataset_exists(&dataset) {
                    Ok(false) => -1,
                    Ok(true) => match store.row_count(&dataset) {
                        Ok(count) => count as i64,
                        Err(err) => {
                            tracing::warn!("could not count {dataset}: {err}");
                            -2
                        }
                    },
                    Err(err) => {
                        tracing::warn!("could not probe {dataset}: {err}");
                        -2
                    }
                };
                counts.insert(name, count);
            }
            counts
        })
        .await
        .unwrap_or_default()
    }

    fn store_status(&self) -> Vec<StoreStatus> {
        Environment::all()
            .into_iter()
            .map(|env| self.store.verify_store(&StoreId::Env(env)))
            .collect()
    }

    async fn generate_report(&self, started_at: chrono::DateTime<Local>, duration: Duration) {
        let report = ExecutionReport::new(
            started_at,
            duration.as_secs_f64(),
            self.results.clone(),
            self.data_counts().await,
            self.store_status(),
        );

        tracing::info!("execution summary");
        tracing::info!("  duration: {:.1} minutes", duration.as_secs_f64() / 60.0);
        tracing::info!("  success rate: {}%", report.summary.success_rate);
        tracing::info!("  phase steps: {}", report.summary.total_operations);

        if let Err(err) = report.write(&self.settings.paths.report_dir, Local::now()) {
            tracing::error!("failed to write execution report: {err}");
        }
    }

    /// Remove stale temp artifacts (interrupted atomic writes, scratch
    /// files) older than one hour, and log total runtime.
    pub fn cleanup_and_finalize(&self, started: Instant) {
        let mut dirs: Vec<PathBuf> = Environment::all()
            .iter()
            .map(|env| self.settings.connections.root(*env).to_path_buf())
            .collect();
        dirs.extend(self.writable_dirs());
        if self.settings.paths.archive_store.is_dir() {
            dirs.push(self.settings.paths.archive_store.clone());
        }

        let mut cleaned = 0usize;
        for dir in dirs {
            cleaned += sweep_temp_files(&dir, TEMP_FILE_MAX_AGE);
        }
        if cleaned > 0 {
            tracing::info!("cleaned up {cleaned} stale temp files");
        }

        tracing::info!(
            "total execution time: {:.1} minutes",
            started.elapsed().as_secs_f64() / 60.0
        );
    }
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".ptsync_probe.tmp");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)
}

/// Delete `*.ptsync.tmp` / `temp_*` entries older than `max_age` in `dir`.
fn sweep_temp_files(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_temp = name.ends_with(".ptsync.tmp") || name.starts_with("temp_");
        if !is_temp {
            continue;
        }
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .map(|age| age >= max_age)
            .unwrap_or(false);
        if old_enough && std::fs::remove_file(entry.path()).is_ok() {
            tracing::debug!("cleaned temp file: {name}");
            cleaned += 1;
        }
    }
    cleaned
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn probe_writable_creates_and_removes_the_probe() {
        let tmp = TempDir::new().expect("tmp");
        let dir = tmp.path().join("fresh");
        probe_writable(&dir).expect("probe");
        assert!(dir.exists());
        assert!(!dir.join(".ptsync_probe.tmp").exists());
    }

    #[test]
    fn sweep_ignores_fresh_files_and_datasets() {
        let tmp = TempDir::new().expect("tmp");
        std::fs::write(tmp.path().join("WR_PT_Points.json"), "[]").expect("dataset");
        std::fs::write(tmp.path().join("fresh.ptsync.tmp"), "x").expect("tmp file");

        // Fresh temp files survive the age gate; datasets are never touched.
        assert_eq!(sweep_temp_files(tmp.path(), TEMP_FILE_MAX_AGE), 0);
        assert!(tmp.path().join("WR_PT_Points.json").exists());
        assert!(tmp.path().join("fresh.ptsync.tmp").exists());

        // With a zero age gate the leftover is collected.
        assert_eq!(sweep_temp_files(tmp.path(), Duration::ZERO), 1);
        assert!(!tmp.path().join("fresh.ptsync.tmp").exists());
        assert!(tmp.path().join("WR_PT_Points.json").exists());
    }
}
