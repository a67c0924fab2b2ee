// SPDX-License-Identifier: MIT OR Apache-2.0
//! The batch-enrichment driver.
//!
//! Input is a list of ISBNs and/or catalog volume ids. Each reference is
//! enriched independently; individual failures aggregate into a `failed`
//! list instead of failing the job.

use crate::results::{ResultStore, embed_or_spill};
use crate::{PipelineConfig, is_stop_signal};
use async_trait::async_trait;
use serde_json::json;
use shelf_core::CanonicalBook;
use shelf_engine::{EngineError, EnrichmentSeed, Orchestrator, ProviderExclusions};
use shelf_jobs::{JobRegistry, Pipeline, ProgressUpdate};
use shelf_providers::{GoogleBooksClient, ProviderError};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Resolves a catalog volume id to a canonical book.
#[async_trait]
pub trait VolumeResolver: Send + Sync {
    /// Fetch and normalize one volume.
    async fn by_volume_id(&self, volume_id: &str) -> Result<CanonicalBook, ProviderError>;
}

/// Production resolver over the Google Books by-id endpoint.
pub struct GoogleVolumeResolver {
    client: Arc<GoogleBooksClient>,
}

impl GoogleVolumeResolver {
    /// Wrap a client.
    pub fn new(client: Arc<GoogleBooksClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VolumeResolver for GoogleVolumeResolver {
    async fn by_volume_id(&self, volume_id: &str) -> Result<CanonicalBook, ProviderError> {
        let volume = self.client.get_by_volume_id(volume_id).await?;
        Ok(shelf_normalize::google::book_from_volume(&volume))
    }
}

/// Drives `batch_enrichment` jobs.
pub struct EnrichmentDriver {
    engine: Arc<Orchestrator>,
    resolver: Arc<dyn VolumeResolver>,
    jobs: Arc<JobRegistry>,
    results: Arc<dyn ResultStore>,
    config: PipelineConfig,
}

impl EnrichmentDriver {
    /// Wire a driver.
    pub fn new(
        engine: Arc<Orchestrator>,
        resolver: Arc<dyn VolumeResolver>,
        jobs: Arc<JobRegistry>,
        results: Arc<dyn ResultStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            resolver,
            jobs,
            results,
            config,
        }
    }

    /// Run one batch-enrichment job to its terminal state.
    pub async fn run(&self, job_id: Uuid, work_ids: Vec<String>, isbns: Vec<String>) {
        let handle = self.jobs.handle(job_id).await;
        let total = (work_ids.len() + isbns.len()) as u32;
        if let Err(err) = handle.initialize(Pipeline::BatchEnrichment, total).await {
            warn!(%job_id, error = %err, "enrichment job initialization failed");
            return;
        }
        let _ = handle.wait_for_ready(None).await;

        let exclusions = ProviderExclusions::new();
        let mut enriched = Vec::new();
        let mut failed = Vec::new();
        let mut processed = 0u32;

        for isbn in &isbns {
            if handle.is_canceled().await.unwrap_or(true) {
                info!(%job_id, "enrichment job canceled");
                return;
            }
            match self.enrich_isbn(isbn, &exclusions).await {
                Ok(book) => enriched.push(serde_json::to_value(&book).unwrap_or_default()),
                Err(reason) => failed.push(json!({"ref": isbn, "reason": reason})),
            }
            processed += 1;
            if self.push(&handle, processed, total).await.is_err() {
                return;
            }
        }

        for work_id in &work_ids {
            if handle.is_canceled().await.unwrap_or(true) {
                info!(%job_id, "enrichment job canceled");
                return;
            }
            match self.enrich_volume(work_id, &exclusions).await {
                Ok(book) => enriched.push(serde_json::to_value(&book).unwrap_or_default()),
                Err(reason) => failed.push(json!({"ref": work_id, "reason": reason})),
            }
            processed += 1;
            if self.push(&handle, processed, total).await.is_err() {
                return;
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert("successCount".into(), json!(enriched.len()));
        payload.insert("failureCount".into(), json!(failed.len()));
        payload.insert("failed".into(), json!(failed));
        embed_or_spill(
            self.results.as_ref(),
            job_id,
            &mut payload,
            "results",
            json!(enriched),
            self.config.result_spill_bytes,
        )
        .await;
        let _ = handle
            .complete(Pipeline::BatchEnrichment, serde_json::Value::Object(payload))
            .await;
    }

    async fn enrich_isbn(
        &self,
        isbn: &str,
        exclusions: &ProviderExclusions,
    ) -> Result<CanonicalBook, String> {
        let seed = EnrichmentSeed {
            isbn: Some(isbn.to_string()),
            ..EnrichmentSeed::default()
        };
        let budget = self.engine.new_budget();
        self.config
            .retry
            .run(
                |e: &EngineError| matches!(e, EngineError::AllProvidersFailed),
                || self.engine.enrich(&seed, &budget, exclusions),
            )
            .await
            .map_err(|e| e.to_string())
    }

    /// Resolve the volume, then deepen it through the ISBN chain when the
    /// volume carries one.
    async fn enrich_volume(
        &self,
        volume_id: &str,
        exclusions: &ProviderExclusions,
    ) -> Result<CanonicalBook, String> {
        let resolved = self
            .config
            .retry
            .run(
                |e: &ProviderError| e.kind.is_retryable(),
                || self.resolver.by_volume_id(volume_id),
            )
            .await
            .map_err(|e| e.to_string())?;

        if let Some(isbn) = resolved.editions.first().and_then(|e| e.isbn.clone()) {
            if let Ok(book) = self.enrich_isbn(&isbn, exclusions).await {
                return Ok(book);
            }
        }
        Ok(resolved)
    }

    async fn push(
        &self,
        handle: &shelf_jobs::JobHandle,
        processed: u32,
        total: u32,
    ) -> Result<(), ()> {
        let update = ProgressUpdate {
            progress: f64::from(processed) / f64::from(total.max(1)),
            status: "enriching".to_string(),
            processed_count: Some(processed),
            total_count: Some(total),
            extra: serde_json::Map::new(),
        };
        match handle.update_progress(Pipeline::BatchEnrichment, update).await {
            Ok(_) => Ok(()),
            Err(err) if is_stop_signal(&err) => Err(()),
            Err(err) => {
                warn!(error = %err, "progress update failed, continuing");
                Ok(())
            }
        }
    }
}
