//! Stage identifiers, descriptors, artifacts and the stage body trait.
//!
//! A stage is one unit of pipeline work producing exactly one durable
//! artifact. The orchestrator owns sequencing and persistence; a [`Stage`]
//! implementation only turns its input context into an [`Artifact`].

mod artifact;
mod id;

pub use artifact::{Artifact, MergedPart, StageResult, VerdictChoice};
pub use id::StageId;

use crate::context::StageContext;
use crate::errors::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Maps a [`StageId`] to the human-readable name used for checkpoint keys
/// and progress display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// The stage's sort key.
    pub id: StageId,
    /// Snake-case human-readable name, e.g. `integration`.
    pub name: String,
}

impl StageDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(id: StageId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Returns the deterministic checkpoint file stem, e.g.
    /// `stage3_75_integration` for id 3.75 and name `integration`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("stage{}_{}", self.id.slug(), self.name)
    }

    /// Returns the file stem for one fan-out branch part.
    #[must_use]
    pub fn part_stem(&self, branch_key: &str) -> String {
        format!("{}_part_{}", self.file_stem(), branch_key)
    }
}

/// A stage body: an opaque, slow, unreliable external call.
///
/// Implementations receive the accumulated outputs of all prior stages via
/// the context and return exactly one artifact. Retry and timeout policy is
/// stage-internal; the orchestrator never retries.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Executes the stage body.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageBodyFailure`] (or
    /// [`PipelineError::Cancelled`] under cooperative cancellation) when the
    /// remote work fails.
    async fn execute(&self, ctx: &StageContext) -> Result<Artifact, PipelineError>;
}

/// A stage body backed by a synchronous closure.
///
/// Useful for cheap transform stages and for tests; long-running remote
/// bodies implement [`Stage`] directly.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> Result<Artifact, PipelineError> + Send + Sync,
{
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> Result<Artifact, PipelineError> + Send + Sync,
{
    /// Creates a new closure-backed stage.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> Result<Artifact, PipelineError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> Result<Artifact, PipelineError> + Send + Sync,
{
    async fn execute(&self, ctx: &StageContext) -> Result<Artifact, PipelineError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;

    #[test]
    fn test_descriptor_file_stem() {
        let plain = StageDescriptor::new(StageId::integer(1), "discovery");
        assert_eq!(plain.file_stem(), "stage1_discovery");

        let inserted = StageDescriptor::new(StageId::new(15, 4).unwrap(), "integration");
        assert_eq!(inserted.file_stem(), "stage3_75_integration");
    }

    #[test]
    fn test_descriptor_part_stem() {
        let descriptor = StageDescriptor::new(StageId::integer(2), "research");
        assert_eq!(
            descriptor.part_stem("macro"),
            "stage2_research_part_macro"
        );
    }

    #[tokio::test]
    async fn test_fn_stage_executes() {
        let stage = FnStage::new(|_ctx| Ok(Artifact::document("t", "b")));
        let ctx = test_context();
        let artifact = stage.execute(&ctx).await.unwrap();
        assert_eq!(artifact.kind(), "document");
    }
}
