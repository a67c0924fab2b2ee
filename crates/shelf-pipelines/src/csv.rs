// SPDX-License-Identifier: MIT OR Apache-2.0
//! The CSV import driver.

use crate::results::{ResultStore, embed_or_spill};
use crate::{PipelineConfig, is_stop_signal};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use shelf_engine::{EngineError, EnrichmentSeed, Orchestrator, ProviderExclusions};
use shelf_jobs::{JobError, JobRegistry, Pipeline, ProgressUpdate};
use shelf_providers::CsvParser;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Drives `csv_import` jobs: AI parse, then per-row enrichment.
pub struct CsvDriver {
    parser: Arc<dyn CsvParser>,
    engine: Arc<Orchestrator>,
    jobs: Arc<JobRegistry>,
    results: Arc<dyn ResultStore>,
    config: PipelineConfig,
}

impl CsvDriver {
    /// Wire a driver.
    pub fn new(
        parser: Arc<dyn CsvParser>,
        engine: Arc<Orchestrator>,
        jobs: Arc<JobRegistry>,
        results: Arc<dyn ResultStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            parser,
            engine,
            jobs,
            results,
            config,
        }
    }

    /// Run one import job to its terminal state.
    pub async fn run(&self, job_id: Uuid, csv_base64: String) {
        let handle = self.jobs.handle(job_id).await;
        if let Err(err) = handle.initialize(Pipeline::CsvImport, 0).await {
            warn!(%job_id, error = %err, "csv job initialization failed");
            return;
        }
        let _ = handle.wait_for_ready(None).await;

        let text = match BASE64
            .decode(csv_base64.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                let _ = handle
                    .send_error(
                        Pipeline::CsvImport,
                        JobError {
                            code: "INVALID_REQUEST".into(),
                            message: "csvBase64 did not decode to UTF-8 text".into(),
                            retryable: false,
                        },
                    )
                    .await;
                return;
            }
        };

        if self.push(&handle, 0.05, "parsing csv", None, None).await.is_err() {
            return;
        }

        let parsed = match self
            .config
            .retry
            .run(
                |e: &shelf_providers::ProviderError| e.kind.is_retryable(),
                || self.parser.parse_csv(&text),
            )
            .await
        {
            Ok(parsed) => parsed,
            Err(err) => {
                let _ = handle
                    .send_error(
                        Pipeline::CsvImport,
                        JobError {
                            code: "PROVIDER_ERROR".into(),
                            message: format!("csv parse failed: {err}"),
                            retryable: err.kind.is_retryable(),
                        },
                    )
                    .await;
                return;
            }
        };

        let total = parsed.records.len() as u32;
        if total == 0 {
            let _ = handle
                .complete(
                    Pipeline::CsvImport,
                    json!({"booksCount": 0, "successRate": "0/0", "books": []}),
                )
                .await;
            return;
        }

        // One exclusion set per job: a rate-limited provider sits out
        // every remaining row.
        let exclusions = ProviderExclusions::new();
        let mut books = Vec::new();
        let mut succeeded = 0u32;
        for (i, record) in parsed.records.iter().enumerate() {
            if handle.is_canceled().await.unwrap_or(true) {
                info!(%job_id, "csv job canceled mid-import");
                return;
            }

            let seed = EnrichmentSeed {
                isbn: record.isbn.clone(),
                title: Some(record.title.clone()),
                author: record.author.clone(),
            };
            let budget = self.engine.new_budget();
            match self
                .config
                .retry
                .run(
                    |e: &EngineError| matches!(e, EngineError::AllProvidersFailed),
                    || self.engine.enrich(&seed, &budget, &exclusions),
                )
                .await
            {
                Ok(book) => {
                    succeeded += 1;
                    books.push(serde_json::to_value(&book).unwrap_or(json!(record)));
                }
                Err(err) => {
                    warn!(title = %record.title, error = %err, "row enrichment failed");
                    books.push(json!(record));
                }
            }

            let processed = (i + 1) as u32;
            if self
                .push(
                    &handle,
                    f64::from(processed) / f64::from(total),
                    "enriching rows",
                    Some(processed),
                    Some(total),
                )
                .await
                .is_err()
            {
                return;
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert("booksCount".into(), json!(succeeded));
        payload.insert("successRate".into(), json!(format!("{succeeded}/{total}")));
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
            .complete(Pipeline::CsvImport, serde_json::Value::Object(payload))
            .await;
    }

    async fn push(
        &self,
        handle: &shelf_jobs::JobHandle,
        progress: f64,
        status: &str,
        processed: Option<u32>,
        total: Option<u32>,
    ) -> Result<(), ()> {
        let update = ProgressUpdate {
            progress,
            status: status.to_string(),
            processed_count: processed,
            total_count: total,
            extra: serde_json::Map::new(),
        };
        match handle.update_progress(Pipeline::CsvImport, update).await {
            Ok(_) => Ok(()),
            Err(err) if is_stop_signal(&err) => Err(()),
            Err(err) => {
                warn!(error = %err, "progress update failed, continuing");
                Ok(())
            }
        }
    }
}
