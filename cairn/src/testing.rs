//! Test doubles for stages and contexts.
//!
//! Available to downstream crates' tests as well as our own, so the stage
//! fakes live in the library rather than behind `#[cfg(test)]`.

use crate::budget::BudgetTracker;
use crate::cancel::CancelToken;
use crate::context::{ResourceRegistry, StageContext};
use crate::errors::PipelineError;
use crate::stage::{Artifact, Stage, StageId, StageResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A context with no prior results, a default budget, and a fresh token.
#[must_use]
pub fn test_context() -> StageContext {
    test_context_for_run(uuid::Uuid::now_v7(), BTreeMap::new())
}

/// A context for a known run id with the given prior results.
#[must_use]
pub fn test_context_for_run(
    run_id: uuid::Uuid,
    prior: BTreeMap<StageId, StageResult>,
) -> StageContext {
    StageContext::new(
        run_id,
        "TEST",
        Arc::new(prior),
        Arc::new(BudgetTracker::new(None)),
        Arc::new(CancelToken::new()),
        None,
        Arc::new(ResourceRegistry::new()),
    )
}

/// A stage that returns a fixed artifact and records a fixed spend.
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    artifact: Artifact,
    cost_usd: f64,
    delay: Option<Duration>,
    executions: Arc<AtomicUsize>,
}

impl ScriptedStage {
    /// Creates a stage returning `artifact` after recording `cost_usd`
    /// against the context's budget tracker.
    #[must_use]
    pub fn new(artifact: Artifact, cost_usd: f64) -> Self {
        Self {
            artifact,
            cost_usd,
            delay: None,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleeps for `delay` before producing the artifact.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times the body has run. Checkpoint-loaded results never
    /// touch this counter, which is what resume tests assert on.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Artifact, PipelineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.cost_usd > 0.0 {
            ctx.budget().record_usage("scripted", 1, self.cost_usd);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(self.artifact.clone())
    }
}

/// A stage that always fails with a fixed message.
#[derive(Debug, Clone)]
pub struct FailingStage {
    message: String,
}

impl FailingStage {
    /// Creates a stage whose body fails with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Artifact, PipelineError> {
        Err(PipelineError::stage_body("failing", &self.message))
    }
}

/// A stage that cancels the run's token, then reports cancellation.
#[derive(Debug, Clone)]
pub struct CancellingStage {
    reason: String,
}

impl CancellingStage {
    /// Creates a stage that cancels with `reason` when executed.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Stage for CancellingStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Artifact, PipelineError> {
        ctx.cancel_token().cancel(self.reason.clone());
        Err(PipelineError::Cancelled {
            reason: self.reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stage_counts_and_spends() {
        let stage = ScriptedStage::new(Artifact::data(serde_json::json!(1)), 2.5);
        let ctx = test_context();
        stage.execute(&ctx).await.unwrap();
        stage.execute(&ctx).await.unwrap();
        assert_eq!(stage.executions(), 2);
        assert!((ctx.budget().total_spent() - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failing_stage_message() {
        let stage = FailingStage::new("no quota");
        let err = stage.execute(&test_context()).await.unwrap_err();
        assert!(err.to_string().contains("no quota"));
    }
}
