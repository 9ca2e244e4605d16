//! Run lifecycle: handle, status machine and outcome.

use crate::errors::PipelineError;
use crate::stage::{StageId, StageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// The finite-state status of a run.
///
/// Transitions are checked against an explicit table; see
/// [`RunStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet driven.
    #[default]
    Pending,
    /// Stages are being driven.
    Running,
    /// Stopped at a configured pause point, awaiting approval.
    Paused,
    /// All stages completed.
    Completed,
    /// A stage failed or the budget gate tripped.
    Failed,
    /// Cancelled by operator action; resumable, distinct from `Failed`.
    Cancelled,
}

impl RunStatus {
    /// Returns true for statuses that end a run invocation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The allowed-transition table.
    ///
    /// Every status may (re-)enter `Running` — that is how a paused,
    /// failed, cancelled or even completed run is re-driven against the
    /// same output location. `Running` moves to exactly one of the four
    /// stopping statuses.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (_, Self::Running) => self != Self::Running,
            (Self::Running, Self::Paused | Self::Completed | Self::Failed | Self::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Identifies one pipeline execution.
///
/// Created once at run start and immutable thereafter, except for the
/// `current_stage` cursor and `status`, both mutated only by the single
/// orchestrating task between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    /// Unique run identifier, sortable by creation time (UUIDv7).
    pub run_id: Uuid,
    /// The subject being processed, e.g. a ticker symbol.
    pub subject_key: String,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// Where this run's checkpoints and artifacts live.
    pub output_location: PathBuf,
    /// The stage currently being driven, if any.
    pub current_stage: Option<StageId>,
    /// The run's lifecycle status.
    pub status: RunStatus,
}

impl RunHandle {
    /// Creates a fresh handle for a new run.
    #[must_use]
    pub fn new(subject_key: impl Into<String>, output_location: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            subject_key: subject_key.into(),
            started_at: Utc::now(),
            output_location: output_location.into(),
            current_stage: None,
            status: RunStatus::Pending,
        }
    }

    /// Moves the handle to a new status, enforcing the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] for a move the table
    /// does not allow.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// What a finished `run` invocation reports.
///
/// Pause and cancellation are designed control-flow exits, not errors, so
/// they surface here rather than as `Err` values.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run this outcome belongs to.
    pub run_id: Uuid,
    /// The terminal (or paused) status reached.
    pub status: RunStatus,
    /// Stages freshly executed during this invocation, in order.
    pub executed: Vec<StageId>,
    /// Stages loaded from checkpoints during this invocation, in order.
    pub resumed: Vec<StageId>,
    /// Total spend recorded by this invocation, in USD.
    pub total_spent_usd: f64,
    /// The pause point, when `status` is `Paused`.
    pub paused_after: Option<StageId>,
    /// The final stage's result, when `status` is `Completed`.
    pub final_result: Option<StageResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_ids_sort_by_creation() {
        let a = RunHandle::new("GOOGL", "/tmp/a");
        let b = RunHandle::new("GOOGL", "/tmp/b");
        assert!(a.run_id < b.run_id);
    }

    #[test]
    fn test_transition_table() {
        assert!(RunStatus::Pending.can_transition(RunStatus::Running));
        assert!(RunStatus::Running.can_transition(RunStatus::Paused));
        assert!(RunStatus::Running.can_transition(RunStatus::Cancelled));
        assert!(RunStatus::Paused.can_transition(RunStatus::Running));
        assert!(RunStatus::Failed.can_transition(RunStatus::Running));
        assert!(RunStatus::Completed.can_transition(RunStatus::Running));

        assert!(!RunStatus::Pending.can_transition(RunStatus::Completed));
        assert!(!RunStatus::Paused.can_transition(RunStatus::Completed));
        assert!(!RunStatus::Running.can_transition(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition(RunStatus::Pending));
    }

    #[test]
    fn test_handle_transition_enforced() {
        let mut handle = RunHandle::new("GOOGL", "/tmp/run");
        handle.transition(RunStatus::Running).unwrap();
        handle.transition(RunStatus::Paused).unwrap();

        let err = handle.transition(RunStatus::Completed).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(handle.status, RunStatus::Paused);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_handle_serde_round_trip() {
        let handle = RunHandle::new("MSFT", "/data/runs");
        let json = serde_json::to_string(&handle).unwrap();
        let back: RunHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(handle, back);
    }
}
