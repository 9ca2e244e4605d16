//! Best-effort progress notification for external observers.

use super::EventStatus;
use parking_lot::RwLock;
use tracing::{info, warn};

/// A synchronous, best-effort notification channel for UIs and logs.
///
/// Implementations must not raise; the orchestrator additionally catches
/// panics from observer callbacks and logs them, so a broken observer can
/// never affect orchestration.
pub trait ProgressSink: Send + Sync {
    /// Reports a stage transition.
    fn notify(
        &self,
        stage_id: f64,
        stage_name: &str,
        status: EventStatus,
        detail: &str,
        cost_usd_so_far: f64,
    );
}

/// Invokes a sink, suppressing any observer panic.
pub(crate) fn notify_guarded(
    sink: &dyn ProgressSink,
    stage_id: f64,
    stage_name: &str,
    status: EventStatus,
    detail: &str,
    cost_usd_so_far: f64,
) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        sink.notify(stage_id, stage_name, status, detail, cost_usd_so_far);
    }));
    if let Err(e) = result {
        warn!(stage = stage_name, "progress observer panicked: {:?}", e);
    }
}

/// A sink that discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn notify(&self, _: f64, _: &str, _: EventStatus, _: &str, _: f64) {}
}

/// A sink that logs updates through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgressSink;

impl ProgressSink for LoggingProgressSink {
    fn notify(
        &self,
        stage_id: f64,
        stage_name: &str,
        status: EventStatus,
        detail: &str,
        cost_usd_so_far: f64,
    ) {
        info!(
            stage_id = stage_id,
            stage = stage_name,
            status = %status,
            cost_usd = cost_usd_so_far,
            "{detail}"
        );
    }
}

/// One recorded progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// The stage id as a float, for ordering in displays.
    pub stage_id: f64,
    /// The human-readable stage name.
    pub stage_name: String,
    /// The reported status.
    pub status: EventStatus,
    /// Free-text detail.
    pub detail: String,
    /// Running spend at the time of the update.
    pub cost_usd_so_far: f64,
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    updates: RwLock<Vec<ProgressUpdate>>,
}

impl CollectingProgressSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all updates in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.read().clone()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn notify(
        &self,
        stage_id: f64,
        stage_name: &str,
        status: EventStatus,
        detail: &str,
        cost_usd_so_far: f64,
    ) {
        self.updates.write().push(ProgressUpdate {
            stage_id,
            stage_name: stage_name.to_string(),
            status,
            detail: detail.to_string(),
            cost_usd_so_far,
        });
    }
}
