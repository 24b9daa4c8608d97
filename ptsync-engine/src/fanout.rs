//! Bounded-parallelism fan-out over blocking backend work.
//!
//! Units are dispatched onto the blocking-task pool through a semaphore of
//! the requested width and joined as a full batch: the caller never sees
//! partial results, and a failed unit never cancels its siblings. Results
//! are sorted by unit key, so aggregation is independent of completion
//! order.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::EngineError;

type UnitWork = Box<dyn FnOnce() -> Result<Option<u64>, EngineError> + Send + 'static>;

/// One independent blocking unit of a fan-out batch.
pub struct Unit {
    key: String,
    work: UnitWork,
}

impl Unit {
    pub fn new<F>(key: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Result<Option<u64>, EngineError> + Send + 'static,
    {
        Self {
            key: key.into(),
            work: Box::new(work),
        }
    }
}

/// Outcome of one unit: its key, an optional row count, and the failure
/// message if it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitResult {
    pub key: String,
    pub rows: Option<u64>,
    pub error: Option<String>,
}

impl UnitResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run `units` with at most `width` in flight, wait for the whole batch,
/// and return key-sorted results.
///
/// Panicking units are converted into failed results, never propagated.
pub async fn run_parallel(width: usize, units: Vec<Unit>) -> Vec<UnitResult> {
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut join_set: JoinSet<UnitResult> = JoinSet::new();

    for unit in units {
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            // The semaphore is never closed while the batch runs.
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let Unit { key, work } = unit;
            let join = tokio::task::spawn_blocking(work).await;
            match join {
                Ok(Ok(rows)) => UnitResult {
                    key,
                    rows,
                    error: None,
                },
                Ok(Err(err)) => {
                    tracing::error!(unit = key, error = %err, "fan-out unit failed");
                    UnitResult {
                        key,
                        rows: None,
                        error: Some(err.to_string()),
                    }
                }
                Err(join_err) => {
                    tracing::error!(unit = key, "fan-out unit panicked: {join_err}");
                    UnitResult {
                        key,
                        rows: None,
                        error: Some(format!("worker panicked: {join_err}")),
                    }
                }
            }
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            // The inner task never panics (blocking panics are caught above),
            // but a join error still must not poison the batch.
            Err(join_err) => results.push(UnitResult {
                key: String::from("<lost unit>"),
                rows: None,
                error: Some(format!("join error: {join_err}")),
            }),
        }
    }

    results.sort_by(|a, b| a.key.cmp(&b.key));
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
