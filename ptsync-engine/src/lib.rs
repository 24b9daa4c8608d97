//! # ptsync-engine
//!
//! The synchronization core: bounded retry over backend calls, the
//! bounded-parallel fan-out primitive, declarative sync operations, the
//! phase state machine (phases 2–7), the orchestrator, and the execution
//! report.
//!
//! Call [`Orchestrator::initialize`] and then one of
//! [`Orchestrator::execute_full_workflow`], [`Orchestrator::execute_phase_only`],
//! or [`Orchestrator::dry_run`].

pub mod error;
pub mod fanout;
pub mod ops;
pub mod orchestrator;
pub mod phase;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod retry;

pub use error::EngineError;
pub use orchestrator::Orchestrator;
pub use phase::{FailureKind, OperationResult, Phase, PhaseFailure, PhaseOutcome};
pub use pipeline::SyncPipeline;
pub use report::ExecutionReport;
pub use retry::{with_retry, RetryPolicy};
