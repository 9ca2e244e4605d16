//! Append-only event log implementations.

use super::AuditEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// An append-only audit trail.
///
/// `append` is infallible at the interface: an implementation whose backing
/// store is unavailable logs a warning and drops the event rather than
/// failing the pipeline.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event. Never fails the caller.
    async fn append(&self, event: AuditEvent);
}

/// A log that discards all events. The default when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventLog;

#[async_trait]
impl EventLog for NoOpEventLog {
    async fn append(&self, _event: AuditEvent) {}
}

/// A log appending one JSON object per line to a file in the run directory.
///
/// Kept separate from checkpoint files so the trail survives artifact
/// supersession.
#[derive(Debug, Clone)]
pub struct JsonlEventLog {
    path: PathBuf,
}

impl JsonlEventLog {
    /// Creates a log writing to the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append_line(&self, event: &AuditEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: AuditEvent) {
        if let Err(e) = self.append_line(&event) {
            warn!(
                stage = %event.stage_name,
                status = %event.status,
                "audit event dropped, log unavailable: {e}"
            );
        }
    }
}

/// An in-memory log for tests and embedded observers.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events in append order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Counts events matching a stage name and status.
    #[must_use]
    pub fn count(&self, stage_name: &str, status: super::EventStatus) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage_name == stage_name && e.status == status)
            .count()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: AuditEvent) {
        self.events.write().push(event);
    }
}
