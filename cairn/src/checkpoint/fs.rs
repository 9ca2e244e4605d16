//! Filesystem-backed checkpoint store.

use super::CheckpointStore;
use crate::errors::CheckpointError;
use crate::run::RunHandle;
use crate::stage::StageResult;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const HANDLE_FILE: &str = "run.json";

/// Stores each run's checkpoints as pretty-printed JSON files under one
/// root directory (the run's output location).
///
/// Layout: `{root}/run.json` for the handle, `{root}/{run_id}/{stem}.json`
/// per stage, with superseded versions archived as `{stem}.v{N}.json`.
/// Writes go through a temp file in the destination directory followed by a
/// rename, so `exists` never observes a truncated artifact.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    /// Creates a store rooted at the given output location.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output location this store is bound to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn stage_path(&self, run_id: Uuid, stage_name: &str) -> PathBuf {
        self.run_dir(run_id).join(format!("{stage_name}.json"))
    }

    fn write_atomic(dir: &Path, path: &Path, json: &str, key: &str) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::io(key, e))?;
        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| CheckpointError::io(key, e))?;
        temp.write_all(json.as_bytes())
            .and_then(|()| temp.flush())
            .map_err(|e| CheckpointError::io(key, e))?;
        temp.persist(path).map_err(|e| CheckpointError::io(key, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        stage_name: &str,
        result: &StageResult,
    ) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| CheckpointError::shape_mismatch(stage_name, e))?;
        let dir = self.run_dir(run_id);
        let path = self.stage_path(run_id, stage_name);
        Self::write_atomic(&dir, &path, &json, stage_name)?;
        debug!(stage = stage_name, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(
        &self,
        run_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<StageResult>, CheckpointError> {
        let path = self.stage_path(run_id, stage_name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(stage_name, e)),
        };
        let result: StageResult = serde_json::from_str(&contents)
            .map_err(|e| CheckpointError::shape_mismatch(stage_name, e))?;
        Ok(Some(result))
    }

    async fn exists(&self, run_id: Uuid, stage_name: &str) -> Result<bool, CheckpointError> {
        Ok(self.stage_path(run_id, stage_name).is_file())
    }

    async fn supersede(&self, run_id: Uuid, stage_name: &str) -> Result<(), CheckpointError> {
        let path = self.stage_path(run_id, stage_name);
        if !path.is_file() {
            return Ok(());
        }
        let dir = self.run_dir(run_id);
        for version in 1u32.. {
            let archived = dir.join(format!("{stage_name}.v{version}.json"));
            if !archived.exists() {
                std::fs::rename(&path, &archived)
                    .map_err(|e| CheckpointError::io(stage_name, e))?;
                debug!(
                    stage = stage_name,
                    version = version,
                    "checkpoint superseded"
                );
                break;
            }
        }
        Ok(())
    }

    async fn save_handle(&self, handle: &RunHandle) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(handle)
            .map_err(|e| CheckpointError::shape_mismatch(HANDLE_FILE, e))?;
        let path = self.root.join(HANDLE_FILE);
        Self::write_atomic(&self.root, &path, &json, HANDLE_FILE)
    }

    async fn load_latest_handle(&self) -> Result<Option<RunHandle>, CheckpointError> {
        let path = self.root.join(HANDLE_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(HANDLE_FILE, e)),
        };
        let handle: RunHandle = serde_json::from_str(&contents)
            .map_err(|e| CheckpointError::shape_mismatch(HANDLE_FILE, e))?;
        Ok(Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Artifact, StageDescriptor, StageId};
    use pretty_assertions::assert_eq;

    fn sample_result() -> (StageDescriptor, StageResult) {
        let descriptor = StageDescriptor::new(StageId::new(15, 4).unwrap(), "integration");
        let result = StageResult::new(
            &descriptor,
            Artifact::document("Integration", "merged findings"),
            2.5,
        );
        (descriptor, result)
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let run_id = Uuid::now_v7();
        let (descriptor, result) = sample_result();
        let stem = descriptor.file_stem();

        assert!(!store.exists(run_id, &stem).await.unwrap());
        store.save(run_id, &stem, &result).await.unwrap();
        assert!(store.exists(run_id, &stem).await.unwrap());

        let loaded = store.load(run_id, &stem).await.unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test]
    async fn test_file_name_matches_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let run_id = Uuid::now_v7();
        let (descriptor, result) = sample_result();

        store
            .save(run_id, &descriptor.file_stem(), &result)
            .await
            .unwrap();
        assert!(dir
            .path()
            .join(run_id.to_string())
            .join("stage3_75_integration.json")
            .is_file());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let run_id = Uuid::now_v7();

        let run_dir = dir.path().join(run_id.to_string());
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("stage1_fetch.json"), "{\"not\": \"a result\"}").unwrap();

        let err = store.load(run_id, "stage1_fetch").await.unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[tokio::test]
    async fn test_truncated_checkpoint_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let run_id = Uuid::now_v7();

        let run_dir = dir.path().join(run_id.to_string());
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("stage1_fetch.json"), "{\"stage_id\": {\"nu").unwrap();

        let err = store.load(run_id, "stage1_fetch").await.unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[tokio::test]
    async fn test_supersede_archives_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let run_id = Uuid::now_v7();
        let (descriptor, result) = sample_result();
        let stem = descriptor.file_stem();

        store.save(run_id, &stem, &result).await.unwrap();
        store.supersede(run_id, &stem).await.unwrap();
        assert!(!store.exists(run_id, &stem).await.unwrap());

        let archived = dir
            .path()
            .join(run_id.to_string())
            .join("stage3_75_integration.v1.json");
        assert!(archived.is_file());

        // A second supersede cycle picks the next free version.
        store.save(run_id, &stem, &result).await.unwrap();
        store.supersede(run_id, &stem).await.unwrap();
        assert!(dir
            .path()
            .join(run_id.to_string())
            .join("stage3_75_integration.v2.json")
            .is_file());
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        assert!(store.load_latest_handle().await.unwrap().is_none());

        let handle = RunHandle::new("GOOGL", dir.path());
        store.save_handle(&handle).await.unwrap();
        let loaded = store.load_latest_handle().await.unwrap().unwrap();
        assert_eq!(loaded, handle);
    }
}
