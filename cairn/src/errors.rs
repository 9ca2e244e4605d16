//! Error types for the cairn orchestrator.
//!
//! The taxonomy separates errors that terminate a run (budget exhaustion,
//! stage body failures) from errors that are recovered locally (a corrupt
//! checkpoint is treated as "stage not yet run", an observability failure is
//! downgraded to a warning and never surfaces here).

use crate::run::RunStatus;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage required an input artifact that was absent or incomplete.
    ///
    /// During resume-set computation this is recovered locally by treating
    /// the stage as not yet run; during execution it is fatal.
    #[error("stage '{stage}' is missing a required input: {detail}")]
    StageInputMissing {
        /// The stage that required the input.
        stage: String,
        /// What was missing.
        detail: String,
    },

    /// The remote call(s) inside a stage body raised.
    #[error("stage '{stage}' failed: {message}")]
    StageBodyFailure {
        /// The stage whose body failed.
        stage: String,
        /// The underlying failure, flattened to a message.
        message: String,
    },

    /// The spend ceiling was reached before a stage could start.
    ///
    /// Checkpoints written so far remain valid; the run can be resumed with
    /// a raised ceiling.
    #[error("budget exceeded: spent ${spent_usd:.2} of ${ceiling_usd:.2} ceiling")]
    BudgetExceeded {
        /// The configured ceiling in USD.
        ceiling_usd: f64,
        /// Total spend at the time of the check.
        spent_usd: f64,
    },

    /// The run was cancelled by an external operator action.
    #[error("run cancelled: {reason}")]
    Cancelled {
        /// The reason supplied at cancellation time.
        reason: String,
    },

    /// An illegal run-status transition was attempted.
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition {
        /// The current status.
        from: RunStatus,
        /// The requested status.
        to: RunStatus,
    },

    /// A pipeline plan or configuration failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A checkpoint store operation failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// IO error outside the checkpoint store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Creates a stage body failure from any displayable error.
    ///
    /// Stage implementations use this to surface remote-call failures with
    /// the owning stage name attached.
    pub fn stage_body(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::StageBodyFailure {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this error represents cooperative cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The underlying storage failed.
    #[error("checkpoint io for '{stage}': {source}")]
    Io {
        /// The checkpoint key involved.
        stage: String,
        /// The underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// A stored artifact no longer deserializes into the expected shape.
    ///
    /// Callers treat this as "stage not resumable", never as a crash.
    #[error("checkpoint for '{stage}' does not match the expected shape: {detail}")]
    ShapeMismatch {
        /// The checkpoint key involved.
        stage: String,
        /// Deserialization failure detail.
        detail: String,
    },

    /// A write was interrupted before the artifact became visible.
    ///
    /// The previous state (or absence) is preserved by the atomic write
    /// protocol; this error reports the interruption itself.
    #[error("interrupted checkpoint write for '{stage}': {detail}")]
    Interrupted {
        /// The checkpoint key involved.
        stage: String,
        /// What interrupted the write.
        detail: String,
    },
}

impl CheckpointError {
    /// Wraps an IO error with the checkpoint key it occurred on.
    pub fn io(stage: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            stage: stage.into(),
            source,
        }
    }

    /// Creates a shape-mismatch error from a deserialization failure.
    pub fn shape_mismatch(stage: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::ShapeMismatch {
            stage: stage.into(),
            detail: detail.to_string(),
        }
    }

    /// Returns true if the stored shape did not match expectations.
    #[must_use]
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. })
    }
}
