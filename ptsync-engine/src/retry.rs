//! Bounded retry with doubling backoff for backend calls.
//!
//! Only transient faults are retried. Precondition failures (missing
//! dataset, missing container, corrupt data) are deterministic: they fail
//! fast without consuming any retry budget.

use std::thread;
use std::time::Duration;

use ptsync_store::StoreError;

use crate::error::EngineError;

/// Retry behavior for a single backend operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after every failure.
    pub initial_delay: Duration,
    /// Upper bound on the doubling delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy with millisecond delays, for tests and dry probing.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        }
    }
}

/// Run `f`, retrying transient failures with doubling backoff.
///
/// Blocking; always invoked from a worker thread, never from the async
/// executor itself.
///
/// # Errors
///
/// Returns the underlying error immediately for precondition failures, or
/// [`EngineError::RetryExhausted`] carrying the last transient error once
/// `max_attempts` have been consumed.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, EngineError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match f() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => {
                tracing::debug!(operation, error = %err, "precondition failure, not retrying");
                return Err(EngineError::Store(err));
            }
            Err(err) if attempt >= policy.max_attempts => {
                return Err(EngineError::RetryExhausted {
                    operation: operation.to_owned(),
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                thread::sleep(delay);
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
