// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable job storage behind the entity's throttled persistence.

use crate::state::{AuthToken, JobState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What one save writes: state plus the current token, so cleanup removes
/// both at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedJob {
    /// Job state snapshot.
    pub state: JobState,
    /// Auth token, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<AuthToken>,
}

/// Storage failure. The entity surfaces it to the caller but keeps its
/// in-memory state.
#[derive(Debug, thiserror::Error)]
#[error("job store: {0}")]
pub struct StoreError(pub String);

/// Durable job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write one job's snapshot.
    async fn save(&self, job: &PersistedJob) -> Result<(), StoreError>;

    /// Read one job's snapshot.
    async fn load(&self, job_id: Uuid) -> Result<Option<PersistedJob>, StoreError>;

    /// Remove one job's snapshot. Absent is not an error.
    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory store for tests and ephemeral deployments. Counts saves so
/// tests can observe persistence throttling.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, PersistedJob>>,
    saves: AtomicU64,
}

impl MemoryJobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &PersistedJob) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.jobs
            .lock()
            .await
            .insert(job.state.job_id, job.clone());
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<PersistedJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.jobs.lock().await.remove(&job_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FsJobStore
// ---------------------------------------------------------------------------

/// File-based store: one JSON file per job under a root directory.
#[derive(Debug)]
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    /// A store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn save(&self, job: &PersistedJob) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(job).map_err(|e| StoreError(e.to_string()))?;
        fs::write(self.path_of(job.state.job_id), bytes)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<PersistedJob>, StoreError> {
        match fs::read(self.path_of(job_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError(e.to_string())),
        }
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        match fs::remove_file(self.path_of(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError(e.to_string())),
        }
    }
}
