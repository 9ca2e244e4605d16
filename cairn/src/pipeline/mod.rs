//! Plan construction, run configuration, and the orchestrator itself.

mod config;
mod orchestrator;
mod plan;
mod runner;

pub use config::RunConfig;
pub use orchestrator::Orchestrator;
pub use plan::{BranchSpec, PipelinePlan, PlanBuilder, PlanStage, StageBody};
pub use runner::StageRunner;
