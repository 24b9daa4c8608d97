//! Phase identity and the tagged phase result.
//!
//! A phase result keeps the simple AND-aggregation ergonomics of a boolean
//! (`PhaseOutcome::success`) while carrying per-operation detail and a
//! structured failure cause into logs and the execution report.

use serde::Serialize;

use crate::fanout::UnitResult;

/// The numbered workflow phases. Phase 1 (cleanup of prior outputs) is
/// operated externally and not modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StagingRefresh,
    Replication,
    ArchiveSnapshot,
    Relationships,
    PublicExport,
    Promotion,
}

impl Phase {
    pub fn all() -> [Phase; 6] {
        [
            Phase::StagingRefresh,
            Phase::Replication,
            Phase::ArchiveSnapshot,
            Phase::Relationships,
            Phase::PublicExport,
            Phase::Promotion,
        ]
    }

    pub fn number(&self) -> u8 {
        match self {
            Phase::StagingRefresh => 2,
            Phase::Replication => 3,
            Phase::ArchiveSnapshot => 4,
            Phase::Relationships => 5,
            Phase::PublicExport => 6,
            Phase::Promotion => 7,
        }
    }

    pub fn from_number(number: u8) -> Option<Phase> {
        Phase::all().into_iter().find(|p| p.number() == number)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Phase::StagingRefresh => "Staging refresh",
            Phase::Replication => "Production replication",
            Phase::ArchiveSnapshot => "Archival snapshot",
            Phase::Relationships => "Relationship classes",
            Phase::PublicExport => "Public data export",
            Phase::Promotion => "Promotion and metadata",
        }
    }

    /// Stable key used in the results map and the execution report.
    pub fn slug(&self) -> &'static str {
        match self {
            Phase::StagingRefresh => "phase_2_staging_refresh",
            Phase::Replication => "phase_3_replication",
            Phase::ArchiveSnapshot => "phase_4_archive_snapshot",
            Phase::Relationships => "phase_5_relationships",
            Phase::PublicExport => "phase_6_public_export",
            Phase::Promotion => "phase_7_promotion",
        }
    }
}

/// Result of one constituent operation of a phase.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn succeeded(key: impl Into<String>, rows: Option<u64>) -> Self {
        Self {
            key: key.into(),
            rows,
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rows: None,
            error: Some(error.into()),
        }
    }
}

impl From<UnitResult> for OperationResult {
    fn from(unit: UnitResult) -> Self {
        Self {
            key: unit.key,
            rows: unit.rows,
            error: unit.error,
        }
    }
}

/// Why a phase failed as a whole, independent of individual operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required input was missing before any work started.
    Precondition,
    /// An unexpected internal failure, converted at the phase boundary.
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// The tagged result every phase method returns. Never an `Err`: internal
/// failures are folded into the outcome so the orchestrator only ever
/// aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub operations: Vec<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PhaseFailure>,
}

impl PhaseOutcome {
    pub fn new(phase: Phase, operations: Vec<OperationResult>) -> Self {
        Self {
            phase,
            operations,
            failure: None,
        }
    }

    pub fn from_units(phase: Phase, units: Vec<UnitResult>) -> Self {
        Self::new(phase, units.into_iter().map(Into::into).collect())
    }

    pub fn precondition(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            operations: Vec::new(),
            failure: Some(PhaseFailure {
                kind: FailureKind::Precondition,
                message: message.into(),
            }),
        }
    }

    pub fn internal(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            operations: Vec::new(),
            failure: Some(PhaseFailure {
                kind: FailureKind::Internal,
                message: message.into(),
            }),
        }
    }

    pub fn with_failure(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.failure = Some(PhaseFailure {
            kind,
            message: message.into(),
        });
        self
    }

    /// Logical AND over every operation, and no phase-level failure.
    pub fn success(&self) -> bool {
        self.failure.is_none() && self.operations.iter().all(OperationResult::ok)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_numbers_roundtrip() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_number(phase.number()), Some(phase));
        }
        assert_eq!(Phase::from_number(1), None);
        assert_eq!(Phase::from_number(8), None);
    }

    #[test]
    fn success_is_the_and_over_operations() {
        let ok = PhaseOutcome::new(
            Phase::Replication,
            vec![
                OperationResult::succeeded("a", Some(3)),
                OperationResult::succeeded("b", None),
            ],
        );
        assert!(ok.success());

        let mixed = PhaseOutcome::new(
            Phase::Replication,
            vec![
                OperationResult::succeeded("a", Some(3)),
                OperationResult::failed("b", "boom"),
            ],
        );
        assert!(!mixed.success());
    }

    #[test]
    fn phase_level_failure_overrides_empty_operations() {
        let outcome = PhaseOutcome::precondition(Phase::Replication, "source missing");
        assert!(!outcome.success());
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Precondition);
    }
}
