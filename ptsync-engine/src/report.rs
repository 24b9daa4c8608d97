//! Timestamped JSON execution report, written after every full workflow run
//! including partial failures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use ptsync_core::types::StoreStatus;

use crate::error::EngineError;
use crate::phase::PhaseOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub timestamp: String,
    pub duration_seconds: f64,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    /// Percentage of successful phase steps, rounded to two decimals.
    pub success_rate: f64,
}

/// The persisted run report.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub summary: ReportSummary,
    pub phases: BTreeMap<String, PhaseOutcome>,
    /// Final record counts per monitored dataset. `-1` marks a dataset that
    /// does not exist, `-2` a count that could not be read.
    pub data_counts: BTreeMap<String, i64>,
    pub store_status: Vec<StoreStatus>,
}

impl ExecutionReport {
    pub fn new(
        started_at: DateTime<Local>,
        duration_seconds: f64,
        phases: BTreeMap<String, PhaseOutcome>,
        data_counts: BTreeMap<String, i64>,
        store_status: Vec<StoreStatus>,
    ) -> Self {
        let total = phases.len();
        let successful = phases.values().filter(|p| p.success()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            (successful as f64 / total as f64 * 10_000.0).round() / 100.0
        };

        Self {
            summary: ReportSummary {
                timestamp: started_at.to_rfc3339(),
                duration_seconds,
                total_operations: total,
                successful_operations: successful,
                failed_operations: total - successful,
                success_rate,
            },
            phases,
            data_counts,
            store_status,
        }
    }

    pub fn overall_success(&self) -> bool {
        self.summary.failed_operations == 0 && self.summary.total_operations > 0
    }

    /// Write `pt_sync_report_<YYYYmmdd_HHMMSS>.json` under `dir`.
    pub fn write(&self, dir: &Path, stamp: DateTime<Local>) -> Result<PathBuf, EngineError> {
        let path = dir.join(format!(
            "pt_sync_report_{}.json",
            stamp.format("%Y%m%d_%H%M%S")
        ));
        let contents = serde_json::to_string_pretty(self).map_err(|e| EngineError::Report {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::create_dir_all(dir).map_err(|e| EngineError::Report {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, contents).map_err(|e| EngineError::Report {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!("execution report saved to {}", path.display());
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
