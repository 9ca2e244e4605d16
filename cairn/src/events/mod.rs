//! Audit events and observability channels.
//!
//! The audit trail is independent of checkpoints: it records every stage
//! transition and survives even if a stage's artifact is later superseded.
//! Failures in either channel are downgraded to warnings and never affect
//! orchestration.

mod log;
mod progress;

pub use log::{EventLog, JsonlEventLog, MemoryEventLog, NoOpEventLog};
pub use progress::{
    CollectingProgressSink, LoggingProgressSink, NoOpProgressSink, ProgressSink, ProgressUpdate,
};
pub(crate) use progress::notify_guarded;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The lifecycle status carried on audit events and progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The stage is about to execute.
    Starting,
    /// The stage is executing (long-running bodies may emit this).
    Running,
    /// The stage finished, or its checkpoint was loaded on resume.
    Complete,
    /// The stage (or the run) failed.
    Error,
    /// The run stopped at a configured pause point.
    Paused,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// One immutable record in the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// The run the event belongs to.
    pub run_id: Uuid,
    /// The stage name the event describes.
    pub stage_name: String,
    /// The transition being recorded.
    pub status: EventStatus,
    /// Free-text detail, e.g. "loaded from checkpoint".
    pub detail: String,
    /// The budget ledger's running total at emission time.
    pub cost_usd_at_emission: f64,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        stage_name: impl Into<String>,
        status: EventStatus,
        detail: impl Into<String>,
        cost_usd_at_emission: f64,
    ) -> Self {
        Self {
            run_id,
            stage_name: stage_name.into(),
            status,
            detail: detail.into(),
            cost_usd_at_emission,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&EventStatus::Starting).unwrap();
        assert_eq!(json, r#""starting""#);
        assert_eq!(EventStatus::Complete.to_string(), "complete");
    }

    #[test]
    fn test_event_round_trip() {
        let event = AuditEvent::new(
            Uuid::now_v7(),
            "stage2_research",
            EventStatus::Complete,
            "loaded from checkpoint",
            12.5,
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
