//! # Cairn
//!
//! A checkpointed multi-stage pipeline orchestrator.
//!
//! Cairn drives long, expensive pipelines (research report generation,
//! multi-step document synthesis) stage by stage, persisting every stage's
//! artifact before the next one starts so an interrupted run resumes from
//! where it stopped instead of repaying for finished work:
//!
//! - **Rational stage ids**: insert `3.5` between `3` and `4` without
//!   renumbering anything
//! - **Durable checkpoints**: atomic per-stage persistence with explicit
//!   supersede-on-rerun versioning
//! - **Fan-out with partial-failure tolerance**: concurrent branches where
//!   only primary branches are load-bearing
//! - **Budget gate**: a spend ceiling checked between stages, never
//!   mid-stage
//! - **Pause points and cancellation**: both are designed exits, not errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cairn::prelude::*;
//!
//! let plan = PipelinePlan::builder("research-report")
//!     .stage(StageId::integer(1), "fetch", fetch_stage)
//!     .stage(StageId::integer(2), "analyze", analyze_stage)
//!     .stage(StageId::integer(3), "publish", publish_stage)
//!     .build()?;
//!
//! let store = Arc::new(FsCheckpointStore::new("/data/runs/acme"));
//! let outcome = Orchestrator::new(store)
//!     .run(&plan, &RunConfig::new("ACME", "/data/runs/acme"))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod budget;
pub mod cancel;
pub mod checkpoint;
pub mod context;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod pipeline;
pub mod run;
pub mod stage;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::budget::{BudgetTracker, LedgerEntry};
    pub use crate::cancel::CancelToken;
    pub use crate::checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore};
    pub use crate::context::{ResourceRegistry, StageContext};
    pub use crate::errors::{CheckpointError, PipelineError};
    pub use crate::events::{
        AuditEvent, EventLog, EventStatus, JsonlEventLog, LoggingProgressSink, MemoryEventLog,
        NoOpEventLog, NoOpProgressSink, ProgressSink,
    };
    pub use crate::fanout::{BranchOutcome, FanOutGroup, FanOutRun, SubTask};
    pub use crate::pipeline::{
        BranchSpec, Orchestrator, PipelinePlan, PlanBuilder, PlanStage, RunConfig, StageBody,
    };
    pub use crate::run::{RunHandle, RunOutcome, RunStatus};
    pub use crate::stage::{
        Artifact, FnStage, MergedPart, Stage, StageDescriptor, StageId, StageResult,
        VerdictChoice,
    };
}
