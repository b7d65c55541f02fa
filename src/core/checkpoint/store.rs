use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::Checkpoint;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Checkpoint corrupted: {0}")]
    Corrupted(String),
}

/// Outcome of [`CheckpointStore::claim_resume`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeClaim {
    /// The pending event was cleared and the claim persisted.
    Accepted(Checkpoint),
    /// A checkpoint exists but nothing is pending for the target.
    NotPending,
    /// No checkpoint for this execution.
    Missing,
}

/// Durable home of interrupted runs, keyed by execute id.
///
/// Holds at most one checkpoint per execution; saving replaces it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, execute_id: i64, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
    async fn load(&self, execute_id: i64) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn delete(&self, execute_id: i64) -> Result<(), CheckpointError>;

    /// Accept resume `data` for the pending event `target` names and persist
    /// the claim before returning, so a later resume of the same event finds
    /// nothing pending.
    ///
    /// The default is load, accept, save. Stores shared between callers
    /// should override it to run those steps under one lock.
    async fn claim_resume(
        &self,
        execute_id: i64,
        target: &str,
        data: String,
    ) -> Result<ResumeClaim, CheckpointError> {
        let Some(mut checkpoint) = self.load(execute_id).await? else {
            return Ok(ResumeClaim::Missing);
        };
        if checkpoint.accept_resume(target, data).is_none() {
            return Ok(ResumeClaim::NotPending);
        }
        self.save(execute_id, &checkpoint).await?;
        Ok(ResumeClaim::Accepted(checkpoint))
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: tokio::sync::RwLock<HashMap<i64, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, execute_id: i64, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.data
            .write()
            .await
            .insert(execute_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, execute_id: i64) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.data.read().await.get(&execute_id).cloned())
    }

    async fn delete(&self, execute_id: i64) -> Result<(), CheckpointError> {
        self.data.write().await.remove(&execute_id);
        Ok(())
    }

    async fn claim_resume(
        &self,
        execute_id: i64,
        target: &str,
        data: String,
    ) -> Result<ResumeClaim, CheckpointError> {
        let mut data_map = self.data.write().await;
        let Some(checkpoint) = data_map.get_mut(&execute_id) else {
            return Ok(ResumeClaim::Missing);
        };
        if checkpoint.accept_resume(target, data).is_none() {
            return Ok(ResumeClaim::NotPending);
        }
        Ok(ResumeClaim::Accepted(checkpoint.clone()))
    }
}

/// One JSON file per execution, so checkpoints survive process restarts.
pub struct FileCheckpointStore {
    dir: PathBuf,
    claim_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::StorageError(e.to_string()))?;
        Ok(Self {
            dir,
            claim_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, execute_id: i64) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", execute_id))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, execute_id: i64, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(execute_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CheckpointError::StorageError(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::StorageError(e.to_string()))
    }

    async fn load(&self, execute_id: i64) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(execute_id);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::StorageError(e.to_string())),
        };

        let checkpoint = serde_json::from_slice::<Checkpoint>(&bytes)
            .map_err(|e| CheckpointError::Corrupted(e.to_string()))?;
        Ok(Some(checkpoint))
    }

    async fn delete(&self, execute_id: i64) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(execute_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::StorageError(e.to_string())),
        }
    }

    async fn claim_resume(
        &self,
        execute_id: i64,
        target: &str,
        data: String,
    ) -> Result<ResumeClaim, CheckpointError> {
        let _guard = self.claim_lock.lock().await;
        let Some(mut checkpoint) = self.load(execute_id).await? else {
            return Ok(ResumeClaim::Missing);
        };
        if checkpoint.accept_resume(target, data).is_none() {
            return Ok(ResumeClaim::NotPending);
        }
        self.save(execute_id, &checkpoint).await?;
        Ok(ResumeClaim::Accepted(checkpoint))
    }
}
