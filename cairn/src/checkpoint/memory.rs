//! In-memory checkpoint store for tests.

use super::CheckpointStore;
use crate::errors::CheckpointError;
use crate::run::RunHandle;
use crate::stage::StageResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// An in-memory store that mirrors the filesystem store's contract.
///
/// Entries are kept as serialized JSON values so shape checking behaves the
/// same as on disk. The store can be told to fail the next save before
/// anything becomes visible, simulating a crash mid-write.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<(Uuid, String), serde_json::Value>>,
    handle: RwLock<Option<RunHandle>>,
    fail_next_save: AtomicBool,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `save` fail before the entry becomes visible.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Injects a raw value under a key, bypassing shape checks.
    ///
    /// Used to model checkpoints written by an older artifact schema.
    pub fn poison(&self, run_id: Uuid, stage_name: &str, value: serde_json::Value) {
        self.entries
            .write()
            .insert((run_id, stage_name.to_string()), value);
    }

    /// Drops an entry, simulating a checkpoint deleted out from under a run.
    pub fn remove(&self, run_id: Uuid, stage_name: &str) {
        self.entries
            .write()
            .remove(&(run_id, stage_name.to_string()));
    }

    /// Returns the number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        run_id: Uuid,
        stage_name: &str,
        result: &StageResult,
    ) -> Result<(), CheckpointError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            // Crash before the rename step: previous state is preserved.
            return Err(CheckpointError::Interrupted {
                stage: stage_name.to_string(),
                detail: "simulated crash mid-write".to_string(),
            });
        }
        let value = serde_json::to_value(result)
            .map_err(|e| CheckpointError::shape_mismatch(stage_name, e))?;
        self.entries
            .write()
            .insert((run_id, stage_name.to_string()), value);
        Ok(())
    }

    async fn load(
        &self,
        run_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<StageResult>, CheckpointError> {
        let value = {
            let entries = self.entries.read();
            entries.get(&(run_id, stage_name.to_string())).cloned()
        };
        match value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| CheckpointError::shape_mismatch(stage_name, e)),
        }
    }

    async fn exists(&self, run_id: Uuid, stage_name: &str) -> Result<bool, CheckpointError> {
        Ok(self
            .entries
            .read()
            .contains_key(&(run_id, stage_name.to_string())))
    }

    async fn supersede(&self, run_id: Uuid, stage_name: &str) -> Result<(), CheckpointError> {
        let mut entries = self.entries.write();
        let Some(value) = entries.remove(&(run_id, stage_name.to_string())) else {
            return Ok(());
        };
        for version in 1u32.. {
            let key = (run_id, format!("{stage_name}.v{version}"));
            if !entries.contains_key(&key) {
                entries.insert(key, value);
                break;
            }
        }
        Ok(())
    }

    async fn save_handle(&self, handle: &RunHandle) -> Result<(), CheckpointError> {
        *self.handle.write() = Some(handle.clone());
        Ok(())
    }

    async fn load_latest_handle(&self) -> Result<Option<RunHandle>, CheckpointError> {
        Ok(self.handle.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Artifact, StageDescriptor, StageId};

    fn sample() -> (String, StageResult) {
        let descriptor = StageDescriptor::new(StageId::integer(1), "fetch");
        let result = StageResult::new(&descriptor, Artifact::data(serde_json::json!(7)), 1.0);
        (descriptor.file_stem(), result)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryCheckpointStore::new();
        let run_id = Uuid::now_v7();
        let (stem, result) = sample();

        store.save(run_id, &stem, &result).await.unwrap();
        let loaded = store.load(run_id, &stem).await.unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test]
    async fn test_simulated_crash_preserves_previous_state() {
        let store = MemoryCheckpointStore::new();
        let run_id = Uuid::now_v7();
        let (stem, result) = sample();

        store.fail_next_save();
        assert!(store.save(run_id, &stem, &result).await.is_err());
        assert!(!store.exists(run_id, &stem).await.unwrap());

        // With a previous valid version, a crash leaves it intact.
        store.save(run_id, &stem, &result).await.unwrap();
        store.fail_next_save();
        assert!(store.save(run_id, &stem, &result).await.is_err());
        assert!(store.exists(run_id, &stem).await.unwrap());
        assert_eq!(store.load(run_id, &stem).await.unwrap().unwrap(), result);
    }

    #[tokio::test]
    async fn test_poisoned_entry_is_shape_mismatch() {
        let store = MemoryCheckpointStore::new();
        let run_id = Uuid::now_v7();
        store.poison(run_id, "stage1_fetch", serde_json::json!({"legacy": true}));

        let err = store.load(run_id, "stage1_fetch").await.unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[tokio::test]
    async fn test_supersede_moves_to_versioned_key() {
        let store = MemoryCheckpointStore::new();
        let run_id = Uuid::now_v7();
        let (stem, result) = sample();

        store.save(run_id, &stem, &result).await.unwrap();
        store.supersede(run_id, &stem).await.unwrap();
        assert!(!store.exists(run_id, &stem).await.unwrap());
        assert!(store
            .exists(run_id, &format!("{stem}.v1"))
            .await
            .unwrap());
    }
}
