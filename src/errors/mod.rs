//! Error kinds used across the runner.
//!
//! Four structural/control-flow signals. `InvalidExperiment` and
//! `InvalidActivity` are only ever raised by validation, before any activity
//! has run; `ActivityFailed` is raised by provider runners and caught by the
//! activity executor, never propagated past it; `InterruptExecution` is
//! raised by a control hook and propagates through every open scope up to
//! the orchestrator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChaosError {
    /// The experiment document itself is structurally broken. Carries every
    /// defect validation found, not just the first.
    #[error("invalid experiment: {}", .0.join("; "))]
    InvalidExperiment(Vec<String>),

    /// A single activity is structurally broken.
    #[error("invalid activity: {0}")]
    InvalidActivity(String),

    /// A provider failed or timed out while running an activity. Recorded
    /// in the journal as a failed `Run`; never surfaced to the caller of
    /// `run_experiment`.
    #[error("activity failed: {0}")]
    ActivityFailed(String),

    /// Raised by a control hook to halt the experiment. Must propagate
    /// through every open control scope and mark the journal `interrupted`.
    #[error("execution interrupted: {0}")]
    InterruptExecution(String),
}

impl ChaosError {
    pub fn activity_failed(msg: impl Into<String>) -> Self {
        ChaosError::ActivityFailed(msg.into())
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, ChaosError::InterruptExecution(_))
    }

    pub fn is_activity_failed(&self) -> bool {
        matches!(self, ChaosError::ActivityFailed(_))
    }
}
