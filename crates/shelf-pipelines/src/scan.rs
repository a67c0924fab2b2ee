// SPDX-License-Identifier: MIT OR Apache-2.0
//! The AI bookshelf-scan driver.
//!
//! Stage 1 sanity-checks the image (progress 0.1), stage 2 runs the
//! vision provider (progress 0.5, with token usage in the payload), and
//! stage 3 enriches each detected book sequentially, walking progress
//! monotonically toward 1.0. Enrichment failures degrade to the raw
//! detection; only scan-stage failures fail the job.

use crate::results::{ResultStore, embed_or_spill};
use crate::{PipelineConfig, is_stop_signal};
use serde_json::json;
use shelf_engine::{EngineError, EnrichmentSeed, Orchestrator, ProviderExclusions};
use shelf_jobs::{JobError, JobRegistry, Pipeline, ProgressUpdate};
use shelf_providers::VisionProvider;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on accepted image payloads.
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// One image of a batch scan.
#[derive(Debug, Clone)]
pub struct BatchImage {
    /// Slot index within the batch.
    pub index: u32,
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// MIME type.
    pub content_type: String,
}

/// Drives `ai_scan` jobs.
pub struct ScanDriver {
    vision: Arc<dyn VisionProvider>,
    engine: Arc<Orchestrator>,
    jobs: Arc<JobRegistry>,
    results: Arc<dyn ResultStore>,
    config: PipelineConfig,
}

impl ScanDriver {
    /// Wire a driver.
    pub fn new(
        vision: Arc<dyn VisionProvider>,
        engine: Arc<Orchestrator>,
        jobs: Arc<JobRegistry>,
        results: Arc<dyn ResultStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            vision,
            engine,
            jobs,
            results,
            config,
        }
    }

    /// Run one single-image scan job to its terminal state.
    pub async fn run(&self, job_id: Uuid, image: Vec<u8>, content_type: String) {
        let handle = self.jobs.handle(job_id).await;
        if let Err(err) = handle.initialize(Pipeline::AiScan, 0).await {
            warn!(%job_id, error = %err, "scan job initialization failed");
            return;
        }
        // Give the client a beat to open its socket; on timeout or
        // disconnect we keep going against storage only.
        let _ = handle.wait_for_ready(None).await;

        // Stage 1: lightweight quality checks.
        if let Some(reason) = image_problem(&image, &content_type) {
            let _ = handle
                .send_error(
                    Pipeline::AiScan,
                    JobError {
                        code: "INVALID_REQUEST".into(),
                        message: reason,
                        retryable: false,
                    },
                )
                .await;
            return;
        }
        if self.push(&handle, 0.1, "image quality check passed", json!({})).await.is_err() {
            return;
        }
        if handle.is_canceled().await.unwrap_or(true) {
            return;
        }

        // Stage 2: vision scan.
        let scan = match self
            .config
            .retry
            .run(
                |e: &shelf_providers::ProviderError| e.kind.is_retryable(),
                || self.vision.scan_image(&image, &content_type),
            )
            .await
        {
            Ok(scan) => scan,
            Err(err) => {
                let _ = handle
                    .send_error(
                        Pipeline::AiScan,
                        JobError {
                            code: "PROVIDER_ERROR".into(),
                            message: format!("image scan failed: {err}"),
                            retryable: err.kind.is_retryable(),
                        },
                    )
                    .await;
                return;
            }
        };

        let total_detected = scan.books.len() as u32;
        let stage2 = json!({
            "totalDetected": total_detected,
            "model": scan.model,
            "tokensUsed": scan.usage,
        });
        if self.push(&handle, 0.5, "scan complete, enriching", stage2).await.is_err() {
            return;
        }

        // Stage 3: sequential enrichment toward 1.0. One exclusion set
        // for the whole job: a provider that rate limits on any book is
        // not asked about the remaining books.
        let exclusions = ProviderExclusions::new();
        let mut books = Vec::new();
        let mut approved = 0u32;
        for (i, detected) in scan.books.iter().enumerate() {
            if handle.is_canceled().await.unwrap_or(true) {
                info!(%job_id, "scan job canceled mid-enrichment");
                return;
            }

            match self.enrich_detected(detected, &exclusions).await {
                Some(book) => {
                    approved += 1;
                    books.push(serde_json::to_value(&book).unwrap_or(json!(detected)));
                }
                None => books.push(json!(detected)),
            }

            let progress = 0.5 + 0.5 * (i + 1) as f64 / total_detected.max(1) as f64;
            let extra = json!({"currentTitle": detected.title});
            if self.push(&handle, progress.min(0.99), "enriching books", extra).await.is_err() {
                return;
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert("totalDetected".into(), json!(total_detected));
        payload.insert("approved".into(), json!(approved));
        embed_or_spill(
            self.results.as_ref(),
            job_id,
            &mut payload,
            "books",
            json!(books),
            self.config.result_spill_bytes,
        )
        .await;
        let _ = handle
            .complete(Pipeline::AiScan, serde_json::Value::Object(payload))
            .await;
    }

    /// Run one batch scan job (one slot per image) to its terminal state.
    pub async fn run_batch(&self, job_id: Uuid, images: Vec<BatchImage>) {
        let handle = self.jobs.handle(job_id).await;
        let total = images.len() as u32;
        if handle.initialize(Pipeline::AiScan, total).await.is_err() {
            return;
        }
        if handle.init_batch(total).await.is_err() {
            return;
        }
        let _ = handle.wait_for_ready(None).await;

        let exclusions = ProviderExclusions::new();
        let mut books = Vec::new();
        for image in images {
            if handle.is_canceled().await.unwrap_or(true) {
                return;
            }

            let set_photo = |status, found, error| shelf_jobs::PhotoUpdate {
                index: image.index,
                status,
                books_found: found,
                error,
            };
            if handle
                .update_photo(set_photo(shelf_jobs::PhotoStatus::Processing, 0, None))
                .await
                .is_err()
            {
                return;
            }

            if let Some(reason) = image_problem(&image.data, &image.content_type) {
                let _ = handle
                    .update_photo(set_photo(shelf_jobs::PhotoStatus::Failed, 0, Some(reason)))
                    .await;
                continue;
            }

            match self
                .config
                .retry
                .run(
                    |e: &shelf_providers::ProviderError| e.kind.is_retryable(),
                    || self.vision.scan_image(&image.data, &image.content_type),
                )
                .await
            {
                Ok(scan) => {
                    let found = scan.books.len() as u32;
                    for detected in &scan.books {
                        match self.enrich_detected(detected, &exclusions).await {
                            Some(book) => {
                                books.push(serde_json::to_value(&book).unwrap_or(json!(detected)));
                            }
                            None => books.push(json!(detected)),
                        }
                    }
                    let _ = handle
                        .update_photo(set_photo(shelf_jobs::PhotoStatus::Complete, found, None))
                        .await;
                }
                Err(err) => {
                    let _ = handle
                        .update_photo(set_photo(
                            shelf_jobs::PhotoStatus::Failed,
                            0,
                            Some(err.to_string()),
                        ))
                        .await;
                }
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert("totalBooks".into(), json!(books.len()));
        embed_or_spill(
            self.results.as_ref(),
            job_id,
            &mut payload,
            "books",
            json!(books),
            self.config.result_spill_bytes,
        )
        .await;
        let _ = handle.complete_batch(serde_json::Value::Object(payload)).await;
    }

    /// Enrichment with its own small budget; failure degrades, never
    /// fails the job.
    async fn enrich_detected(
        &self,
        detected: &shelf_providers::DetectedBook,
        exclusions: &ProviderExclusions,
    ) -> Option<shelf_core::CanonicalBook> {
        let seed = EnrichmentSeed {
            isbn: detected.isbn.clone(),
            title: Some(detected.title.clone()),
            author: detected.author.clone(),
        };
        let budget = self.engine.new_budget();
        match self
            .config
            .retry
            .run(
                |e: &EngineError| matches!(e, EngineError::AllProvidersFailed),
                || self.engine.enrich(&seed, &budget, exclusions),
            )
            .await
        {
            Ok(book) => Some(book),
            Err(err) => {
                warn!(title = %detected.title, error = %err, "enrichment degraded to raw detection");
                None
            }
        }
    }

    async fn push(
        &self,
        handle: &shelf_jobs::JobHandle,
        progress: f64,
        status: &str,
        extra: serde_json::Value,
    ) -> Result<(), ()> {
        let update = ProgressUpdate {
            progress,
            status: status.to_string(),
            processed_count: None,
            total_count: None,
            extra: extra.as_object().cloned().unwrap_or_default(),
        };
        match handle.update_progress(Pipeline::AiScan, update).await {
            Ok(_) => Ok(()),
            Err(err) if is_stop_signal(&err) => Err(()),
            Err(err) => {
                warn!(error = %err, "progress update failed, continuing");
                Ok(())
            }
        }
    }
}

fn image_problem(image: &[u8], content_type: &str) -> Option<String> {
    if image.is_empty() {
        return Some("image body is empty".to_string());
    }
    if image.len() > MAX_IMAGE_BYTES {
        return Some(format!("image exceeds {MAX_IMAGE_BYTES} bytes"));
    }
    if !content_type.starts_with("image/") {
        return Some(format!("unsupported content type {content_type}"));
    }
    None
}
