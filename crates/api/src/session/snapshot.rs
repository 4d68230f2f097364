//! Best-effort persisted copies of the session view
//!
//! Snapshots let a restarted process show something before the first live
//! fetch. They are advisory: quota decisions always go through a live read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use metamind_billing::ReconciledQuota;
use metamind_shared::UserId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Serializable subset of a reconciled quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub used: i64,
    pub limit: i32,
    pub remaining: i64,
    pub is_premium: bool,
    pub has_prompt_history_access: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

impl From<&ReconciledQuota> for SessionSnapshot {
    fn from(quota: &ReconciledQuota) -> Self {
        Self {
            user_id: quota.user_id,
            used: quota.used,
            limit: quota.limit,
            remaining: quota.remaining,
            is_premium: quota.is_premium,
            has_prompt_history_access: quota.has_prompt_history_access,
            fetched_at: quota.fetched_at,
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<SessionSnapshot>, SnapshotError>;
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError>;
    async fn remove(&self, user_id: UserId) -> Result<(), SnapshotError>;
}

/// One JSON file per user under a directory
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("{}.json", user_id))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, user_id: UserId) -> Result<Option<SessionSnapshot>, SnapshotError> {
        match tokio::fs::read(self.path_for(user_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.path_for(snapshot.user_id);
        let temp_path = final_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, serde_json::to_vec(snapshot)?).await?;
        tokio::fs::rename(&temp_path, &final_path).await?;
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<(), SnapshotError> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local snapshots, used when no directory is configured
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<UserId, SessionSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, user_id: UserId) -> Result<Option<SessionSnapshot>, SnapshotError> {
        Ok(self.snapshots.read().await.get(&user_id).cloned())
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.user_id, snapshot.clone());
        Ok(())
    }

    async fn remove(&self, user_id: UserId) -> Result<(), SnapshotError> {
        self.snapshots.write().await.remove(&user_id);
        Ok(())
    }
}
