//! Pipeline plans: the ordered stage sequence and its validating builder.

use crate::errors::PipelineError;
use crate::fanout::FanOutGroup;
use crate::stage::{Stage, StageDescriptor, StageId};
use std::collections::HashSet;
use std::sync::Arc;

/// The three mutually exclusive follow-up bodies of a branch stage.
///
/// The upstream verdict selects exactly one; all three write to the branch
/// stage's own checkpoint slot, so downstream stages and resume logic are
/// branch-agnostic.
#[derive(Debug, Clone)]
pub struct BranchSpec {
    /// The earlier stage whose persisted verdict drives the selection.
    pub verdict_from: StageId,
    /// Runs when the verdict prefers candidate A.
    pub when_a: Arc<dyn Stage>,
    /// Runs when the verdict prefers candidate B.
    pub when_b: Arc<dyn Stage>,
    /// Runs when both candidates were rejected (the rework path).
    pub when_reject: Arc<dyn Stage>,
}

/// How one planned stage produces its artifact.
#[derive(Debug, Clone)]
pub enum StageBody {
    /// A single opaque body.
    Single(Arc<dyn Stage>),
    /// A fan-out group merged into one artifact.
    FanOut(FanOutGroup),
    /// A verdict-selected body.
    Branch(BranchSpec),
}

/// One stage in a plan: its descriptor plus its body.
#[derive(Debug, Clone)]
pub struct PlanStage {
    /// Identity and naming.
    pub descriptor: StageDescriptor,
    /// The body to run when the stage is not resumable.
    pub body: StageBody,
}

/// An ordered, validated stage sequence.
///
/// Stage order is the total order of the rational [`StageId`]s, so a
/// sub-stage inserted via [`StageId::between`] lands in the right place
/// without renumbering.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    name: String,
    stages: Vec<PlanStage>,
}

impl PipelinePlan {
    /// Starts a builder for a named plan.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PlanBuilder {
        PlanBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// The plan's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stages in ascending id order.
    #[must_use]
    pub fn stages(&self) -> &[PlanStage] {
        &self.stages
    }

    /// Returns the stage with the given id, if planned.
    #[must_use]
    pub fn find(&self, id: StageId) -> Option<&PlanStage> {
        self.stages.iter().find(|s| s.descriptor.id == id)
    }
}

/// Builds and validates a [`PipelinePlan`].
#[derive(Debug)]
pub struct PlanBuilder {
    name: String,
    stages: Vec<PlanStage>,
}

impl PlanBuilder {
    /// Adds a single-body stage.
    #[must_use]
    pub fn stage(mut self, id: StageId, name: impl Into<String>, body: Arc<dyn Stage>) -> Self {
        self.stages.push(PlanStage {
            descriptor: StageDescriptor::new(id, name),
            body: StageBody::Single(body),
        });
        self
    }

    /// Adds a fan-out stage.
    #[must_use]
    pub fn fan_out(mut self, id: StageId, name: impl Into<String>, group: FanOutGroup) -> Self {
        self.stages.push(PlanStage {
            descriptor: StageDescriptor::new(id, name),
            body: StageBody::FanOut(group),
        });
        self
    }

    /// Adds a verdict-selected branch stage.
    #[must_use]
    pub fn branch(mut self, id: StageId, name: impl Into<String>, spec: BranchSpec) -> Self {
        self.stages.push(PlanStage {
            descriptor: StageDescriptor::new(id, name),
            body: StageBody::Branch(spec),
        });
        self
    }

    /// Validates and builds the plan.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name or stage list,
    /// duplicate stage ids, an ill-formed fan-out group, or a branch whose
    /// verdict source is not an earlier stage.
    pub fn build(mut self) -> Result<PipelinePlan, PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "plan name cannot be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::Validation(format!(
                "plan '{}' has no stages",
                self.name
            )));
        }

        self.stages.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.descriptor.id) {
                return Err(PipelineError::Validation(format!(
                    "duplicate stage id {} in plan '{}'",
                    stage.descriptor.id, self.name
                )));
            }
        }

        for stage in &self.stages {
            match &stage.body {
                StageBody::FanOut(group) => group.validate()?,
                StageBody::Branch(spec) => {
                    let earlier = self
                        .stages
                        .iter()
                        .any(|s| s.descriptor.id == spec.verdict_from);
                    if !earlier || spec.verdict_from >= stage.descriptor.id {
                        return Err(PipelineError::Validation(format!(
                            "branch stage {} references verdict stage {} which is not an earlier stage",
                            stage.descriptor.id, spec.verdict_from
                        )));
                    }
                }
                StageBody::Single(_) => {}
            }
        }

        Ok(PipelinePlan {
            name: self.name,
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Artifact;
    use crate::testing::ScriptedStage;

    fn body(label: &str) -> Arc<dyn Stage> {
        Arc::new(ScriptedStage::new(Artifact::document(label, ""), 0.0))
    }

    #[test]
    fn test_stages_sorted_by_rational_id() {
        let plan = PipelinePlan::builder("report")
            .stage(StageId::integer(4), "publish", body("publish"))
            .stage(StageId::integer(3), "draft", body("draft"))
            .stage(StageId::new(15, 4).unwrap(), "integration", body("integration"))
            .stage(StageId::new(7, 2).unwrap(), "verify", body("verify"))
            .build()
            .unwrap();

        let names: Vec<&str> = plan
            .stages()
            .iter()
            .map(|s| s.descriptor.name.as_str())
            .collect();
        assert_eq!(names, vec!["draft", "verify", "integration", "publish"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = PipelinePlan::builder("p")
            .stage(StageId::integer(1), "a", body("a"))
            .stage(StageId::integer(1), "b", body("b"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(PipelinePlan::builder("p").build().is_err());
        assert!(PipelinePlan::builder("  ")
            .stage(StageId::integer(1), "a", body("a"))
            .build()
            .is_err());
    }

    #[test]
    fn test_branch_must_reference_earlier_stage() {
        let spec = BranchSpec {
            verdict_from: StageId::integer(5),
            when_a: body("a"),
            when_b: body("b"),
            when_reject: body("r"),
        };
        let result = PipelinePlan::builder("p")
            .stage(StageId::integer(1), "compare", body("compare"))
            .branch(StageId::integer(2), "select", spec)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_find() {
        let plan = PipelinePlan::builder("p")
            .stage(StageId::integer(1), "a", body("a"))
            .build()
            .unwrap();
        assert!(plan.find(StageId::integer(1)).is_some());
        assert!(plan.find(StageId::integer(2)).is_none());
    }
}
