//! Execution context handed to stage bodies, and shared-resource teardown.
//!
//! Data flows forward only: a stage sees the persisted results of every
//! stage before it and nothing else. Clients and other closable resources
//! are explicitly owned by a [`ResourceRegistry`] and closed in LIFO order
//! on every run exit path, never left as ambient globals.

use crate::budget::BudgetTracker;
use crate::cancel::CancelToken;
use crate::errors::PipelineError;
use crate::stage::{StageId, StageResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// What a stage body sees while executing.
///
/// Cheap to clone; fan-out sub-tasks each receive a clone sharing the same
/// budget tracker and cancel token.
#[derive(Debug, Clone)]
pub struct StageContext {
    run_id: uuid::Uuid,
    subject_key: String,
    prior: Arc<BTreeMap<StageId, StageResult>>,
    budget: Arc<BudgetTracker>,
    cancel: Arc<CancelToken>,
    deadline: Option<DateTime<Utc>>,
    resources: Arc<ResourceRegistry>,
}

impl StageContext {
    /// Creates a context for one stage invocation.
    #[must_use]
    pub fn new(
        run_id: uuid::Uuid,
        subject_key: impl Into<String>,
        prior: Arc<BTreeMap<StageId, StageResult>>,
        budget: Arc<BudgetTracker>,
        cancel: Arc<CancelToken>,
        deadline: Option<DateTime<Utc>>,
        resources: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            run_id,
            subject_key: subject_key.into(),
            prior,
            budget,
            cancel,
            deadline,
            resources,
        }
    }

    /// The run this context belongs to.
    #[must_use]
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// The subject being processed.
    #[must_use]
    pub fn subject_key(&self) -> &str {
        &self.subject_key
    }

    /// Returns a prior stage's result, if that stage has run.
    #[must_use]
    pub fn prior(&self, id: StageId) -> Option<&StageResult> {
        self.prior.get(&id)
    }

    /// Returns all prior results in stage order.
    #[must_use]
    pub fn prior_results(&self) -> &BTreeMap<StageId, StageResult> {
        &self.prior
    }

    /// Returns a required prior stage's result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageInputMissing`] when the stage has not
    /// produced a result.
    pub fn require(&self, id: StageId, requesting_stage: &str) -> Result<&StageResult, PipelineError> {
        self.prior
            .get(&id)
            .ok_or_else(|| PipelineError::StageInputMissing {
                stage: requesting_stage.to_string(),
                detail: format!("no result for stage {id}"),
            })
    }

    /// The run's budget tracker, for metering remote usage.
    #[must_use]
    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// The shared cancel token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bails out with a cancellation error if one has been requested.
    ///
    /// Stage bodies call this at their own suspension points; the
    /// orchestrator also checks between stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] when the token is set.
    pub fn check_cancelled(&self) -> Result<(), PipelineError> {
        self.cancel.check()
    }

    /// The caller-supplied deadline, threaded through for cooperative
    /// cancellation. The orchestrator imposes no global timeout.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Returns whether the caller-supplied deadline has passed.
    #[must_use]
    pub fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() >= d)
    }

    /// The shared resource registry.
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }
}

/// A named close callback for a shared resource.
struct ResourceEntry {
    name: String,
    close: Box<dyn Fn() + Send + Sync>,
}

/// Explicitly-owned, explicitly-closed resources shared across stage bodies.
///
/// Close callbacks run in LIFO order on every run exit path. A panicking
/// callback is logged and does not stop the remaining callbacks.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: RwLock<Vec<ResourceEntry>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource's close callback under a name.
    pub fn register<F>(&self, name: impl Into<String>, close: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.entries.write().push(ResourceEntry {
            name: name.into(),
            close: Box::new(close),
        });
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Closes all resources in LIFO order and clears the registry.
    ///
    /// Returns the names of callbacks that panicked.
    pub fn close_all(&self) -> Vec<String> {
        let entries: Vec<ResourceEntry> = {
            let mut guard = self.entries.write();
            std::mem::take(&mut *guard)
        };

        let mut failed = Vec::new();
        for entry in entries.into_iter().rev() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (entry.close)();
            })) {
                warn!(resource = %entry.name, "resource close panicked: {:?}", e);
                failed.push(entry.name);
            }
        }
        failed
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Artifact, StageDescriptor};
    use crate::testing::test_context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_prior_lookup() {
        let descriptor = StageDescriptor::new(StageId::integer(1), "fetch");
        let result = StageResult::new(&descriptor, Artifact::data(serde_json::json!(1)), 0.0);
        let mut prior = BTreeMap::new();
        prior.insert(descriptor.id, result);

        let ctx = StageContext::new(
            uuid::Uuid::now_v7(),
            "GOOGL",
            Arc::new(prior),
            Arc::new(BudgetTracker::default()),
            Arc::new(CancelToken::new()),
            None,
            Arc::new(ResourceRegistry::new()),
        );

        assert!(ctx.prior(StageId::integer(1)).is_some());
        assert!(ctx.prior(StageId::integer(2)).is_none());
        let err = ctx.require(StageId::integer(2), "analysis").unwrap_err();
        assert!(matches!(err, PipelineError::StageInputMissing { .. }));
    }

    #[test]
    fn test_check_cancelled() {
        let ctx = test_context();
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel_token().cancel("operator");
        let err = ctx.check_cancelled().unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_deadline_expiry() {
        let ctx = test_context();
        assert!(!ctx.deadline_expired());
    }

    #[test]
    fn test_registry_lifo_order() {
        let registry = ResourceRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        for name in ["db", "http", "cache"] {
            let order = order.clone();
            registry.register(name, move || {
                order.write().push(name);
            });
        }

        let failed = registry.close_all();
        assert!(failed.is_empty());
        assert_eq!(*order.read(), vec!["cache", "http", "db"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_panics_do_not_stop_teardown() {
        let registry = ResourceRegistry::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let closed_clone = closed.clone();
        registry.register("quiet", move || {
            closed_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.register("loud", || panic!("broken client"));

        let failed = registry.close_all();
        assert_eq!(failed, vec!["loud".to_string()]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
