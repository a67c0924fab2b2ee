// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job endpoints: pipeline starts (202 + token), cancel, token refresh.

use crate::api::{
    BatchScanRequest, CancelRequest, CsvImportRequest, EnrichmentStartRequest, TokenRefreshRequest,
};
use crate::{AppState, entity_error, respond_err, respond_ok, validation};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use shelf_core::envelope::ResponseMetadata;
use shelf_error::{ErrorCode, ShelfError};
use shelf_jobs::{JobHandle, Pipeline};
use shelf_pipelines::BatchImage;
use shelf_telemetry::MetricEvent;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Initialize the entity and mint its auth token, building the shared
/// `202 Accepted` payload.
async fn accept_job(
    state: &AppState,
    handle: &JobHandle,
    pipeline: Pipeline,
    total_count: u32,
) -> Result<serde_json::Value, ShelfError> {
    handle
        .initialize(pipeline, total_count)
        .await
        .map_err(entity_error)?;
    let token = handle.set_auth_token(None).await.map_err(entity_error)?;

    state.metrics.record(MetricEvent::Job {
        pipeline: pipeline.to_string(),
        phase: "started".to_string(),
    });

    let accepted = crate::api::JobAccepted {
        job_id: handle.job_id(),
        status: "started",
        pipeline: pipeline.to_string(),
        token: token.value,
        expires_in: state.job_config.token_ttl.as_secs(),
        websocket_url: format!("/ws/progress?jobId={}", handle.job_id()),
    };
    serde_json::to_value(&accepted)
        .map_err(|_| ShelfError::new(ErrorCode::InternalError, "response encoding failed"))
}

fn accepted_response(data: serde_json::Value, pipeline: Pipeline) -> Response {
    respond_ok(
        data,
        ResponseMetadata::now(pipeline.to_string(), false),
        "NONE",
        StatusCode::ACCEPTED,
    )
}

// ---------------------------------------------------------------------------
// Pipeline starts
// ---------------------------------------------------------------------------

/// `POST /api/enrichment/start`
pub async fn cmd_enrichment_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnrichmentStartRequest>,
) -> Response {
    let job_id = match validation::validate_job_id(&body.job_id) {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };
    if body.work_ids.is_empty() && body.isbns.is_empty() {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "enrichment needs at least one workId or isbn",
        ));
    }
    for isbn in &body.isbns {
        if let Err(err) = validation::validate_isbn(isbn) {
            return respond_err(&err);
        }
    }

    let handle = state.jobs.handle(job_id).await;
    let total = (body.work_ids.len() + body.isbns.len()) as u32;
    let data = match accept_job(&state, &handle, Pipeline::BatchEnrichment, total).await {
        Ok(data) => data,
        Err(err) => return respond_err(&err),
    };

    let driver = state.enrich.clone();
    tokio::spawn(async move {
        driver.run(job_id, body.work_ids, body.isbns).await;
    });

    accepted_response(data, Pipeline::BatchEnrichment)
}

/// `POST /api/scan-bookshelf?jobId=<uuid>` with raw image bytes.
pub async fn cmd_scan(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let job_id = match params
        .get("jobId")
        .ok_or_else(|| ShelfError::new(ErrorCode::InvalidRequest, "jobId query parameter required"))
        .and_then(|raw| validation::validate_job_id(raw))
    {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    if !content_type.starts_with("image/") {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "body must be an image/* payload",
        ));
    }
    if body.is_empty() {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "image body is empty",
        ));
    }

    let handle = state.jobs.handle(job_id).await;
    let data = match accept_job(&state, &handle, Pipeline::AiScan, 0).await {
        Ok(data) => data,
        Err(err) => return respond_err(&err),
    };

    let driver = state.scan.clone();
    let image = body.to_vec();
    tokio::spawn(async move {
        driver.run(job_id, image, content_type).await;
    });

    accepted_response(data, Pipeline::AiScan)
}

/// `POST /api/scan-bookshelf/batch`
pub async fn cmd_scan_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchScanRequest>,
) -> Response {
    let job_id = match validation::validate_job_id(&body.job_id) {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };
    if body.images.is_empty() {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "batch scan needs at least one image",
        ));
    }

    let mut images = Vec::with_capacity(body.images.len());
    for image in &body.images {
        let Ok(data) = BASE64.decode(image.data.as_bytes()) else {
            return respond_err(&ShelfError::new(
                ErrorCode::InvalidRequest,
                format!("image {} is not valid base64", image.index),
            ));
        };
        images.push(BatchImage {
            index: image.index,
            data,
            content_type: image
                .content_type
                .clone()
                .unwrap_or_else(|| "image/jpeg".to_string()),
        });
    }

    let handle = state.jobs.handle(job_id).await;
    let total = images.len() as u32;
    let data = match accept_job(&state, &handle, Pipeline::AiScan, total).await {
        Ok(data) => data,
        Err(err) => return respond_err(&err),
    };

    let driver = state.scan.clone();
    tokio::spawn(async move {
        driver.run_batch(job_id, images).await;
    });

    accepted_response(data, Pipeline::AiScan)
}

/// `POST /api/import/csv`
pub async fn cmd_import_csv(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CsvImportRequest>,
) -> Response {
    let job_id = match validation::validate_job_id(&body.job_id) {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };
    if body.csv_base64.trim().is_empty() {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "csvBase64 is required",
        ));
    }

    let handle = state.jobs.handle(job_id).await;
    let data = match accept_job(&state, &handle, Pipeline::CsvImport, 0).await {
        Ok(data) => data,
        Err(err) => return respond_err(&err),
    };

    let driver = state.csv.clone();
    tokio::spawn(async move {
        driver.run(job_id, body.csv_base64).await;
    });

    accepted_response(data, Pipeline::CsvImport)
}

// ---------------------------------------------------------------------------
// Cancel and token refresh
// ---------------------------------------------------------------------------

/// `POST /api/enrichment/cancel`
pub async fn cmd_enrichment_cancel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelRequest>,
) -> Response {
    let job_id = match validation::validate_job_id(&body.job_id) {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };

    let handle = state.jobs.handle(job_id).await;
    match handle.cancel(body.reason).await {
        Ok(()) => {
            state.metrics.record(MetricEvent::Job {
                pipeline: "unknown".to_string(),
                phase: "canceled".to_string(),
            });
            respond_ok(
                json!({"jobId": job_id, "status": "canceled"}),
                ResponseMetadata::now("jobs", false),
                "NONE",
                StatusCode::OK,
            )
        }
        Err(err) => {
            if matches!(err, shelf_jobs::JobEntityError::EntityGone) {
                state.jobs.evict(job_id);
            }
            respond_err(&entity_error(err))
        }
    }
}

/// `POST /api/token/refresh`
pub async fn cmd_token_refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenRefreshRequest>,
) -> Response {
    let job_id = match validation::validate_job_id(&body.job_id) {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };
    let Ok(token) = body.token.trim().parse::<Uuid>() else {
        return respond_err(&ShelfError::new(
            ErrorCode::Unauthorized,
            "Invalid or expired token",
        ));
    };

    let handle = state.jobs.handle(job_id).await;
    match handle.refresh_auth_token(token).await {
        Ok(new_token) => respond_ok(
            json!({
                "token": new_token.value,
                "expiresIn": state.job_config.token_ttl.as_secs(),
            }),
            ResponseMetadata::now("jobs", false),
            "NONE",
            StatusCode::OK,
        ),
        Err(err) => {
            if matches!(err, shelf_jobs::JobEntityError::EntityGone) {
                state.jobs.evict(job_id);
            }
            // An unknown job must not leak whether it ever existed.
            let mapped = match err {
                shelf_jobs::JobEntityError::NotInitialized
                | shelf_jobs::JobEntityError::EntityGone => {
                    ShelfError::new(ErrorCode::Unauthorized, "Invalid or expired token")
                }
                other => entity_error(other),
            };
            respond_err(&mapped)
        }
    }
}
