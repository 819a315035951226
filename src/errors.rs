//! Typed error hierarchy for the validation orchestrator.
//!
//! Four enums cover the subsystems:
//! - `RegistryError`: run lookup and state-machine violations
//! - `CapabilityError`: failures reported by the external analysis capability
//! - `ReportError`: report store lookups and write rules
//! - `RunError`: everything that can end a run, wrapping the three above

use thiserror::Error;

/// Errors from the run registry.
///
/// `InvalidTransition`, `ProgressRegression`, `VerdictOverwrite` and
/// `RevisionAlreadyAttempted` are orchestration bugs, not runtime conditions.
/// They are never retried or coerced.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Run {run_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: String,
        to: String,
    },

    #[error("Run {run_id}: progress cannot move backwards ({from} -> {to})")]
    ProgressRegression { run_id: String, from: u8, to: u8 },

    #[error("Run {run_id}: verdict already set to {current}, refusing overwrite outside revision")]
    VerdictOverwrite { run_id: String, current: String },

    #[error("Run {run_id}: revision already attempted")]
    RevisionAlreadyAttempted { run_id: String },

    #[error("Run {run_id}: revision requires an analyzing run with a NO/HOLD verdict")]
    RevisionNotApplicable { run_id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl RegistryError {
    /// True for the programming-error class (state-machine violations).
    pub fn is_state_machine_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::ProgressRegression { .. }
                | Self::VerdictOverwrite { .. }
                | Self::RevisionAlreadyAttempted { .. }
                | Self::RevisionNotApplicable { .. }
        )
    }
}

/// Errors from the external analysis capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Analysis provider unreachable: {0}")]
    Unreachable(String),

    #[error("Analysis provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Stage {stage} returned an empty result")]
    EmptyOutput { stage: String },

    #[error("Stage {stage} returned malformed output: {reason}")]
    MalformedOutput { stage: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the report store.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Report for run {run_id} not found")]
    NotFound { run_id: String },

    #[error("Report not ready. Current status: {status}")]
    NotReady { run_id: String, status: String },

    #[error("Report for run {run_id} was already rewritten once")]
    AlreadyFinal { run_id: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

/// Errors that terminate a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Stage {stage} failed: {source}")]
    Capability {
        stage: String,
        #[source]
        source: CapabilityError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl RunError {
    pub fn is_state_machine_violation(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_state_machine_violation(),
            _ => false,
        }
    }
}
