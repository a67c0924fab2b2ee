// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request and response body types for the public API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /api/enrichment/start` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentStartRequest {
    /// Client-chosen job id.
    pub job_id: String,
    /// Catalog volume ids to enrich.
    #[serde(default)]
    pub work_ids: Vec<String>,
    /// ISBNs to enrich.
    #[serde(default)]
    pub isbns: Vec<String>,
}

/// `POST /api/enrichment/cancel` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Job to cancel.
    pub job_id: String,
    /// Optional human-readable reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// One image of `POST /api/scan-bookshelf/batch`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchImageRequest {
    /// Slot index within the batch.
    pub index: u32,
    /// Base64-encoded image bytes.
    pub data: String,
    /// MIME type; defaults to JPEG.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// `POST /api/scan-bookshelf/batch` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScanRequest {
    /// Client-chosen job id.
    pub job_id: String,
    /// The images to scan.
    pub images: Vec<BatchImageRequest>,
}

/// `POST /api/import/csv` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvImportRequest {
    /// Client-chosen job id.
    pub job_id: String,
    /// Base64-encoded CSV text.
    pub csv_base64: String,
}

/// `POST /api/token/refresh` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshRequest {
    /// Job the token belongs to.
    pub job_id: String,
    /// The current token value.
    pub token: String,
}

/// The `202 Accepted` payload every pipeline start returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    /// The job id.
    pub job_id: Uuid,
    /// Always `"started"`.
    pub status: &'static str,
    /// Pipeline name.
    pub pipeline: String,
    /// WebSocket auth token for this job.
    pub token: Uuid,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    /// Where to open the progress socket.
    pub websocket_url: String,
}
