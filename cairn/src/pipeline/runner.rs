//! Executes one planned stage and answers whether it can be resumed.

use crate::checkpoint::CheckpointStore;
use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::pipeline::plan::{BranchSpec, PlanStage, StageBody};
use crate::stage::{Artifact, StageDescriptor, StageResult, VerdictChoice};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Drives a single stage: resume probing, body dispatch, and the extra
/// per-branch persistence a fan-out stage carries.
#[derive(Clone)]
pub struct StageRunner {
    store: Arc<dyn CheckpointStore>,
}

impl StageRunner {
    /// Creates a runner over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Loads the stage's prior result if it is complete enough to skip
    /// re-execution.
    ///
    /// A single or branch stage resumes from its own checkpoint alone. A
    /// fan-out stage resumes only when the merged artifact, a part
    /// checkpoint for every merged key, and every primary branch all
    /// survive; anything less and the whole group re-runs. A stored shape
    /// that no longer deserializes marks the stage not resumable rather
    /// than aborting the run.
    ///
    /// # Errors
    ///
    /// Propagates storage I/O failures.
    pub async fn probe(
        &self,
        plan_stage: &PlanStage,
        run_id: Uuid,
    ) -> Result<Option<StageResult>, PipelineError> {
        let descriptor = &plan_stage.descriptor;
        let stem = descriptor.file_stem();

        let loaded = match self.store.load(run_id, &stem).await {
            Ok(loaded) => loaded,
            Err(e) if e.is_shape_mismatch() => {
                warn!(stage = %stem, "checkpoint shape mismatch, re-executing: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(result) = loaded else {
            return Ok(None);
        };

        if let StageBody::FanOut(group) = &plan_stage.body {
            let Some(parts) = result.artifact.as_merged() else {
                warn!(stage = %stem, "checkpoint is not a merged artifact, re-executing");
                return Ok(None);
            };
            for part in parts {
                let part_stem = descriptor.part_stem(&part.key);
                if !self.store.exists(run_id, &part_stem).await? {
                    warn!(
                        stage = %stem,
                        branch = %part.key,
                        "merged checkpoint lists a branch with no part checkpoint, re-executing"
                    );
                    return Ok(None);
                }
            }
            for key in group.primary_keys() {
                if !parts.iter().any(|p| p.key == key) {
                    warn!(
                        stage = %stem,
                        branch = %key,
                        "primary branch missing from merged checkpoint, re-executing"
                    );
                    return Ok(None);
                }
            }
        }

        debug!(stage = %stem, "resumable from checkpoint");
        Ok(Some(result))
    }

    /// Executes the stage body and returns its artifact.
    ///
    /// Fan-out part checkpoints are persisted here, before the orchestrator
    /// persists the merged artifact, so a crash between the two leaves the
    /// parts on disk and the merged slot empty.
    ///
    /// # Errors
    ///
    /// Propagates the body's error, a missing upstream input, or a part
    /// checkpoint write failure.
    pub async fn execute(
        &self,
        plan_stage: &PlanStage,
        ctx: &StageContext,
    ) -> Result<Artifact, PipelineError> {
        let descriptor = &plan_stage.descriptor;
        match &plan_stage.body {
            StageBody::Single(body) => body.execute(ctx).await,
            StageBody::FanOut(group) => {
                let run = group.run(ctx, &descriptor.name).await?;
                let Some(parts) = run.merged.as_merged() else {
                    // run() always returns a merged artifact.
                    return Ok(run.merged);
                };
                for part in parts {
                    let part_stem = descriptor.part_stem(&part.key);
                    let part_result = StageResult {
                        stage_id: descriptor.id,
                        stage_name: part_stem.clone(),
                        artifact: part.artifact.clone(),
                        produced_at: chrono::Utc::now(),
                        cost_usd: 0.0,
                        succeeded: true,
                    };
                    self.store
                        .save(ctx.run_id(), &part_stem, &part_result)
                        .await?;
                }
                Ok(run.merged)
            }
            StageBody::Branch(spec) => {
                let body = Self::select_branch(spec, ctx, descriptor)?;
                body.execute(ctx).await
            }
        }
    }

    fn select_branch<'a>(
        spec: &'a BranchSpec,
        ctx: &StageContext,
        descriptor: &StageDescriptor,
    ) -> Result<&'a Arc<dyn crate::stage::Stage>, PipelineError> {
        let upstream = ctx.require(spec.verdict_from, &descriptor.name)?;
        let Some(choice) = upstream.artifact.as_verdict() else {
            return Err(PipelineError::StageInputMissing {
                stage: descriptor.name.clone(),
                detail: format!(
                    "stage {} produced a {} artifact, expected a verdict",
                    spec.verdict_from,
                    upstream.artifact.kind()
                ),
            });
        };
        debug!(stage = %descriptor.name, verdict = %choice, "verdict selected branch body");
        Ok(match choice {
            VerdictChoice::PreferA => &spec.when_a,
            VerdictChoice::PreferB => &spec.when_b,
            VerdictChoice::RejectBoth => &spec.when_reject,
        })
    }
}
