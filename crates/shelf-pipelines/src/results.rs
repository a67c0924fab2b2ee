// SPDX-License-Identifier: MIT OR Apache-2.0
//! Spill storage for large job results.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Failure writing a result object.
#[derive(Debug, thiserror::Error)]
#[error("result store: {0}")]
pub struct ResultStoreError(pub String);

/// Where completed jobs park result sets too large to embed in the
/// completion envelope. Returns the URL clients fetch instead.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `body` for `job_id`; returns the public URL.
    async fn put_results(
        &self,
        job_id: Uuid,
        body: &serde_json::Value,
    ) -> Result<String, ResultStoreError>;
}

/// Filesystem-backed result store serving under a base URL.
pub struct FsResultStore {
    root: PathBuf,
    base_url: String,
}

impl FsResultStore {
    /// Store under `root`, addressed as `{base_url}/{job_id}.json`.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put_results(
        &self,
        job_id: Uuid,
        body: &serde_json::Value,
    ) -> Result<String, ResultStoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ResultStoreError(e.to_string()))?;
        let bytes = serde_json::to_vec(body).map_err(|e| ResultStoreError(e.to_string()))?;
        fs::write(self.root.join(format!("{job_id}.json")), bytes)
            .await
            .map_err(|e| ResultStoreError(e.to_string()))?;
        Ok(format!(
            "{}/{job_id}.json",
            self.base_url.trim_end_matches('/')
        ))
    }
}

/// In-memory result store for tests.
#[derive(Default)]
pub struct MemoryResultStore {
    bodies: tokio::sync::Mutex<Vec<(Uuid, serde_json::Value)>>,
}

impl MemoryResultStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored body for `job_id`, when any.
    pub async fn body_of(&self, job_id: Uuid) -> Option<serde_json::Value> {
        self.bodies
            .lock()
            .await
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_results(
        &self,
        job_id: Uuid,
        body: &serde_json::Value,
    ) -> Result<String, ResultStoreError> {
        self.bodies.lock().await.push((job_id, body.clone()));
        Ok(format!("memory://results/{job_id}.json"))
    }
}

/// Embed `items` under `key`, or spill them behind `resultsUrl` when the
/// serialized size crosses `spill_bytes`.
pub(crate) async fn embed_or_spill(
    store: &dyn ResultStore,
    job_id: Uuid,
    payload: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    items: serde_json::Value,
    spill_bytes: usize,
) {
    let size = serde_json::to_vec(&items).map(|b| b.len()).unwrap_or(0);
    if size > spill_bytes {
        match store.put_results(job_id, &items).await {
            Ok(url) => {
                payload.insert("resultsUrl".to_string(), serde_json::Value::String(url));
                return;
            }
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "result spill failed, embedding inline");
            }
        }
    }
    payload.insert(key.to_string(), items);
}
