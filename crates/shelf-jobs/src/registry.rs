// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic addressing of job entities by id.

use crate::entity::{self, JobConfig, JobHandle};
use crate::store::JobStore;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Hands out the one [`JobHandle`] per job id, spawning entities on
/// demand and hydrating them from storage when a prior incarnation
/// persisted state.
pub struct JobRegistry {
    jobs: DashMap<Uuid, JobHandle>,
    store: Arc<dyn JobStore>,
    config: JobConfig,
}

impl JobRegistry {
    /// A registry over `store` with shared entity `config`.
    pub fn new(store: Arc<dyn JobStore>, config: JobConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            store,
            config,
        }
    }

    /// The handle for `job_id`, spawning (and hydrating) if needed.
    pub async fn handle(&self, job_id: Uuid) -> JobHandle {
        if let Some(handle) = self.jobs.get(&job_id) {
            return handle.clone();
        }

        // Hydrate outside the map lock; a racing caller may win the
        // insert, in which case its entity is the one everybody shares.
        let preload = match self.store.load(job_id).await {
            Ok(preload) => preload,
            Err(err) => {
                warn!(%job_id, error = %err, "job hydration failed, starting empty");
                None
            }
        };

        self.jobs
            .entry(job_id)
            .or_insert_with(|| {
                entity::spawn(job_id, Arc::clone(&self.store), self.config.clone(), preload)
            })
            .clone()
    }

    /// Drop a dead entity's handle so the next call respawns it.
    pub fn evict(&self, job_id: Uuid) {
        self.jobs.remove(&job_id);
    }

    /// Number of live handles (monitoring).
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when no entities are tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
