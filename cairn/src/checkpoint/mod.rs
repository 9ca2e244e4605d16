//! Durable per-stage checkpoint persistence.
//!
//! Checkpoints are keyed by `(run_id, stage_name)` where `stage_name` is
//! the descriptor's deterministic file stem (`stage3_75_integration`); a
//! fan-out stage persists `{stem}_part_{branch_key}` entries alongside the
//! merged artifact. The storage engine is abstracted behind a trait; the
//! filesystem implementation writes atomically so a crash mid-persist never
//! leaves a truncated artifact visible.

mod fs;
mod memory;

pub use fs::FsCheckpointStore;
pub use memory::MemoryCheckpointStore;

use crate::errors::CheckpointError;
use crate::run::RunHandle;
use crate::stage::StageResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable key→artifact persistence for one output location.
///
/// A store instance is bound to an output location at construction; the
/// run handle persisted through [`CheckpointStore::save_handle`] is what a
/// later `resume` invocation replays against.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists a stage result. The write is atomic: observers see either
    /// the previous state or the complete new artifact, never a partial one.
    async fn save(
        &self,
        run_id: Uuid,
        stage_name: &str,
        result: &StageResult,
    ) -> Result<(), CheckpointError>;

    /// Loads a stage result.
    ///
    /// Returns `Ok(None)` when no checkpoint exists. A stored artifact that
    /// no longer matches the expected shape fails loudly with
    /// [`CheckpointError::ShapeMismatch`]; callers treat that as "stage not
    /// resumable", not as a crash.
    async fn load(
        &self,
        run_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<StageResult>, CheckpointError>;

    /// Returns whether a checkpoint exists for the key.
    async fn exists(&self, run_id: Uuid, stage_name: &str) -> Result<bool, CheckpointError>;

    /// Archives an existing checkpoint as a new version so an explicit
    /// re-run never edits a persisted result in place. No-op when absent.
    async fn supersede(&self, run_id: Uuid, stage_name: &str) -> Result<(), CheckpointError>;

    /// Persists the run handle for later resume against this location.
    async fn save_handle(&self, handle: &RunHandle) -> Result<(), CheckpointError>;

    /// Loads the most recently persisted run handle, if any.
    async fn load_latest_handle(&self) -> Result<Option<RunHandle>, CheckpointError>;
}
