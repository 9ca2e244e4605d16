//! The checkpointed pipeline driver.
//!
//! One orchestrator instance drives a plan against a checkpoint store:
//! stages execute in ascending id order, each result is persisted before
//! the next stage starts, and a later invocation with `resume` set replays
//! the persisted checkpoints instead of re-executing the work.

use crate::budget::BudgetTracker;
use crate::cancel::CancelToken;
use crate::checkpoint::CheckpointStore;
use crate::context::{ResourceRegistry, StageContext};
use crate::errors::PipelineError;
use crate::events::{
    notify_guarded, AuditEvent, EventLog, EventStatus, NoOpEventLog, NoOpProgressSink, ProgressSink,
};
use crate::pipeline::config::RunConfig;
use crate::pipeline::plan::{PipelinePlan, PlanStage};
use crate::pipeline::runner::StageRunner;
use crate::run::{RunHandle, RunOutcome, RunStatus};
use crate::stage::{StageId, StageResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives pipeline runs against one checkpoint store.
///
/// The orchestrator is cheap to share: the cancel token it exposes can be
/// handed to a signal handler or an operator surface while `run` is in
/// flight.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventLog>,
    progress: Arc<dyn ProgressSink>,
    cancel: Arc<CancelToken>,
    resources: Arc<ResourceRegistry>,
    budget: Option<Arc<BudgetTracker>>,
}

impl Orchestrator {
    /// Creates an orchestrator with no-op event and progress sinks.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            events: Arc::new(NoOpEventLog),
            progress: Arc::new(NoOpProgressSink),
            cancel: Arc::new(CancelToken::new()),
            resources: Arc::new(ResourceRegistry::new()),
            budget: None,
        }
    }

    /// Replaces the audit event log.
    #[must_use]
    pub fn with_event_log(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Uses an externally owned cancel token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: Arc<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Uses an externally owned resource registry.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<ResourceRegistry>) -> Self {
        self.resources = resources;
        self
    }

    /// Uses an externally owned budget tracker, so a caller can inspect
    /// the ledger after the run or raise the ceiling between invocations.
    #[must_use]
    pub fn with_budget_tracker(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// The cancel token governing runs on this orchestrator.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    /// Requests cancellation. Idempotent; the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Runs the plan under the given config.
    ///
    /// Pause and cancellation are `Ok` outcomes carrying [`RunStatus::Paused`]
    /// or [`RunStatus::Cancelled`]; only stage failures, budget refusals,
    /// and storage faults are `Err`. Registered resources are closed after
    /// the run regardless of how it ended.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, [`PipelineError::BudgetExceeded`]
    /// when the spend gate refuses a stage, or a checkpoint storage error.
    pub async fn run(
        &self,
        plan: &PipelinePlan,
        config: &RunConfig,
    ) -> Result<RunOutcome, PipelineError> {
        let result = self.run_inner(plan, config).await;
        let failed = self.resources.close_all();
        if !failed.is_empty() {
            warn!(resources = ?failed, "resource close callbacks panicked");
        }
        result
    }

    /// Runs the plan with `resume` forced on: the latest persisted run
    /// under the config's output location is replayed.
    ///
    /// # Errors
    ///
    /// Same contract as [`Orchestrator::run`].
    pub async fn resume(
        &self,
        plan: &PipelinePlan,
        config: &RunConfig,
    ) -> Result<RunOutcome, PipelineError> {
        let config = config.clone().resume();
        self.run(plan, &config).await
    }

    async fn run_inner(
        &self,
        plan: &PipelinePlan,
        config: &RunConfig,
    ) -> Result<RunOutcome, PipelineError> {
        let mut handle = self.open_handle(config).await?;
        info!(
            run_id = %handle.run_id,
            plan = %plan.name(),
            subject = %config.subject_key,
            "run starting"
        );

        let budget = self
            .budget
            .clone()
            .unwrap_or_else(|| Arc::new(BudgetTracker::new(config.budget_ceiling_usd)));
        if let Some(ceiling) = config.budget_ceiling_usd {
            if self.budget.is_some() && budget.ceiling() < ceiling {
                budget.raise_ceiling(ceiling)?;
            }
        }

        let runner = StageRunner::new(self.store.clone());
        let mut prior: BTreeMap<StageId, StageResult> = BTreeMap::new();
        let mut executed = Vec::new();
        let mut resumed = Vec::new();

        for plan_stage in plan.stages() {
            let descriptor = &plan_stage.descriptor;
            let stem = descriptor.file_stem();

            handle.current_stage = Some(descriptor.id);
            self.store.save_handle(&handle).await?;

            if self.cancel.is_cancelled() {
                return self
                    .finish_cancelled(&mut handle, &budget, executed, resumed)
                    .await;
            }

            let force_rerun = config.rerun.contains(&descriptor.id);
            if force_rerun {
                self.supersede_stage(plan_stage, handle.run_id).await?;
            }

            if config.resume && !force_rerun {
                if let Some(result) = runner.probe(plan_stage, handle.run_id).await? {
                    self.emit(
                        handle.run_id,
                        &stem,
                        descriptor,
                        EventStatus::Complete,
                        "loaded from checkpoint",
                        budget.total_spent(),
                    )
                    .await;
                    resumed.push(descriptor.id);
                    prior.insert(descriptor.id, result);
                    continue;
                }
            }

            // Spend gate: refuse to start, never interrupt.
            if budget.is_exceeded() {
                let detail = format!(
                    "budget exhausted before stage start: spent {:.2} of {:.2} USD",
                    budget.total_spent(),
                    budget.ceiling()
                );
                self.emit(
                    handle.run_id,
                    &stem,
                    descriptor,
                    EventStatus::Error,
                    detail,
                    budget.total_spent(),
                )
                .await;
                handle.transition(RunStatus::Failed)?;
                self.store.save_handle(&handle).await?;
                return Err(PipelineError::BudgetExceeded {
                    ceiling_usd: budget.ceiling(),
                    spent_usd: budget.total_spent(),
                });
            }

            self.emit(
                handle.run_id,
                &stem,
                descriptor,
                EventStatus::Starting,
                "executing",
                budget.total_spent(),
            )
            .await;

            let ctx = StageContext::new(
                handle.run_id,
                config.subject_key.clone(),
                Arc::new(prior.clone()),
                budget.clone(),
                self.cancel.clone(),
                config.deadline,
                self.resources.clone(),
            );

            let spent_before = budget.total_spent();
            let artifact = match runner.execute(plan_stage, &ctx).await {
                Ok(artifact) => artifact,
                Err(e) if e.is_cancellation() => {
                    return self
                        .finish_cancelled(&mut handle, &budget, executed, resumed)
                        .await;
                }
                Err(e) => {
                    self.emit(
                        handle.run_id,
                        &stem,
                        descriptor,
                        EventStatus::Error,
                        e.to_string(),
                        budget.total_spent(),
                    )
                    .await;
                    handle.transition(RunStatus::Failed)?;
                    self.store.save_handle(&handle).await?;
                    return Err(e);
                }
            };

            let stage_cost = budget.total_spent() - spent_before;
            let result = StageResult::new(descriptor, artifact, stage_cost);
            self.store.save(handle.run_id, &stem, &result).await?;

            self.emit(
                handle.run_id,
                &stem,
                descriptor,
                EventStatus::Complete,
                "completed",
                budget.total_spent(),
            )
            .await;

            executed.push(descriptor.id);
            prior.insert(descriptor.id, result);

            let is_last = plan
                .stages()
                .last()
                .is_some_and(|s| s.descriptor.id == descriptor.id);
            if config.pause_after == Some(descriptor.id) && !is_last {
                self.emit(
                    handle.run_id,
                    &stem,
                    descriptor,
                    EventStatus::Paused,
                    "paused for operator review",
                    budget.total_spent(),
                )
                .await;
                handle.transition(RunStatus::Paused)?;
                self.store.save_handle(&handle).await?;
                info!(run_id = %handle.run_id, stage = %stem, "run paused");
                return Ok(RunOutcome {
                    run_id: handle.run_id,
                    status: RunStatus::Paused,
                    executed,
                    resumed,
                    total_spent_usd: budget.total_spent(),
                    paused_after: Some(descriptor.id),
                    final_result: None,
                });
            }
        }

        handle.current_stage = None;
        handle.transition(RunStatus::Completed)?;
        self.store.save_handle(&handle).await?;
        info!(run_id = %handle.run_id, "run completed");

        let final_result = plan
            .stages()
            .last()
            .and_then(|s| prior.get(&s.descriptor.id))
            .cloned();
        Ok(RunOutcome {
            run_id: handle.run_id,
            status: RunStatus::Completed,
            executed,
            resumed,
            total_spent_usd: budget.total_spent(),
            paused_after: None,
            final_result,
        })
    }

    /// Loads the latest persisted handle when resuming, otherwise mints a
    /// fresh one. A handle left in `Running` by a crashed invocation is
    /// taken over as-is.
    async fn open_handle(&self, config: &RunConfig) -> Result<RunHandle, PipelineError> {
        let mut handle = if config.resume {
            match self.store.load_latest_handle().await? {
                Some(handle) => {
                    info!(run_id = %handle.run_id, "resuming persisted run");
                    handle
                }
                None => RunHandle::new(config.subject_key.clone(), config.output_location.clone()),
            }
        } else {
            RunHandle::new(config.subject_key.clone(), config.output_location.clone())
        };
        if handle.status != RunStatus::Running {
            handle.transition(RunStatus::Running)?;
        }
        self.store.save_handle(&handle).await?;
        Ok(handle)
    }

    async fn supersede_stage(
        &self,
        plan_stage: &PlanStage,
        run_id: uuid::Uuid,
    ) -> Result<(), PipelineError> {
        let descriptor = &plan_stage.descriptor;
        self.store
            .supersede(run_id, &descriptor.file_stem())
            .await?;
        if let crate::pipeline::plan::StageBody::FanOut(group) = &plan_stage.body {
            for task in group.tasks() {
                self.store
                    .supersede(run_id, &descriptor.part_stem(&task.key))
                    .await?;
            }
        }
        Ok(())
    }

    async fn finish_cancelled(
        &self,
        handle: &mut RunHandle,
        budget: &Arc<BudgetTracker>,
        executed: Vec<StageId>,
        resumed: Vec<StageId>,
    ) -> Result<RunOutcome, PipelineError> {
        let reason = self
            .cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        warn!(run_id = %handle.run_id, "run cancelled: {reason}");
        self.events
            .append(AuditEvent::new(
                handle.run_id,
                "run",
                EventStatus::Error,
                format!("cancelled: {reason}"),
                budget.total_spent(),
            ))
            .await;
        handle.transition(RunStatus::Cancelled)?;
        self.store.save_handle(handle).await?;
        Ok(RunOutcome {
            run_id: handle.run_id,
            status: RunStatus::Cancelled,
            executed,
            resumed,
            total_spent_usd: budget.total_spent(),
            paused_after: None,
            final_result: None,
        })
    }

    /// Appends the audit event, then notifies the progress sink. Ordering
    /// matters: the durable record lands before any observer reacts.
    async fn emit(
        &self,
        run_id: uuid::Uuid,
        stem: &str,
        descriptor: &crate::stage::StageDescriptor,
        status: EventStatus,
        detail: impl Into<String>,
        cost_usd: f64,
    ) {
        let detail = detail.into();
        self.events
            .append(AuditEvent::new(run_id, stem, status, detail.clone(), cost_usd))
            .await;
        notify_guarded(
            self.progress.as_ref(),
            descriptor.id.as_f64(),
            &descriptor.name,
            status,
            &detail,
            cost_usd,
        );
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}
