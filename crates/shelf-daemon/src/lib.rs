// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP and WebSocket surface of the Shelfstack book-tracking service.
//!
//! A thin dispatch layer: validation, the unified `{data, metadata}` /
//! `{error}` envelope, rate limiting, and handoff to the orchestrator
//! (synchronous searches) or the pipeline drivers (202 + WebSocket
//! progress).

#![deny(unsafe_code)]

pub mod api;
pub mod jobs;
pub mod middleware;
pub mod validation;
pub mod ws;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use shelf_core::envelope::{ApiEnvelope, ResponseMetadata};
use shelf_core::CanonicalBook;
use shelf_engine::{AdvancedQuery, EngineError, Fetched, Orchestrator, SearchOutcome, SortBy};
use shelf_error::{ErrorCode, ShelfError};
use shelf_jobs::{JobConfig, JobEntityError, JobRegistry};
use shelf_pipelines::{CsvDriver, EnrichmentDriver, ScanDriver};
use shelf_ratelimit::{FailOpenLimiter, LimiterRegistry};
use shelf_telemetry::aggregate::{MetricsAggregator, render_prometheus};
use shelf_telemetry::MetricsSink;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state behind every handler.
pub struct AppState {
    /// The provider orchestrator.
    pub engine: Arc<Orchestrator>,
    /// Job entity registry.
    pub jobs: Arc<JobRegistry>,
    /// AI-scan driver.
    pub scan: Arc<ScanDriver>,
    /// CSV-import driver.
    pub csv: Arc<CsvDriver>,
    /// Batch-enrichment driver.
    pub enrich: Arc<EnrichmentDriver>,
    /// Per-client rate limiter, failing open.
    pub limiter: FailOpenLimiter<LimiterRegistry>,
    /// Sampled, non-blocking metrics sink.
    pub metrics: Arc<dyn MetricsSink>,
    /// Aggregator backing `/metrics`.
    pub aggregator: Arc<MetricsAggregator>,
    /// Entity tuning (token TTLs surface in 202 responses).
    pub job_config: JobConfig,
}

/// Build the Axum router with all public routes and middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/v1/search/title", get(cmd_search_title))
        .route("/v1/search/isbn", get(cmd_search_isbn))
        .route("/v1/search/author", get(cmd_search_author))
        .route(
            "/v1/search/advanced",
            get(cmd_search_advanced_get).post(cmd_search_advanced_post),
        )
        .route("/api/enrichment/start", post(jobs::cmd_enrichment_start))
        .route("/api/enrichment/cancel", post(jobs::cmd_enrichment_cancel))
        .route("/api/scan-bookshelf", post(jobs::cmd_scan))
        .route("/api/scan-bookshelf/batch", post(jobs::cmd_scan_batch))
        .route("/api/import/csv", post(jobs::cmd_import_csv))
        .route("/api/token/refresh", post(jobs::cmd_token_refresh))
        .route("/ws/progress", get(ws::cmd_ws_upgrade))
        .route("/metrics", get(cmd_metrics))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::observe_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response plumbing
// ---------------------------------------------------------------------------

/// Serve a success envelope with an explicit `X-Cache-Status`.
pub(crate) fn respond_ok(
    data: serde_json::Value,
    metadata: ResponseMetadata,
    cache_status: &str,
    status: StatusCode,
) -> Response {
    let envelope = ApiEnvelope::success(data, metadata);
    let mut resp = (status, Json(envelope)).into_response();
    if let Ok(value) = HeaderValue::from_str(cache_status) {
        resp.headers_mut().insert("x-cache-status", value);
    }
    resp
}

/// Serve an error envelope.
pub(crate) fn respond_err(err: &ShelfError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope: ApiEnvelope<serde_json::Value> =
        ApiEnvelope::failure(err.code.as_str(), err.message.clone(), err.http_status());
    let mut resp = (status, Json(envelope)).into_response();
    resp.headers_mut()
        .insert("x-cache-status", HeaderValue::from_static("NONE"));
    resp
}

pub(crate) fn engine_error(err: EngineError) -> ShelfError {
    match err {
        EngineError::NotFound => {
            ShelfError::new(ErrorCode::NotFound, "No provider had the requested book")
        }
        EngineError::AllProvidersFailed => ShelfError::new(
            ErrorCode::ProviderError,
            "Every catalog provider failed for this request",
        ),
        EngineError::Budget(_) => ShelfError::new(
            ErrorCode::UpstreamBudgetExceeded,
            "Upstream call budget exceeded for this request",
        ),
    }
}

pub(crate) fn entity_error(err: JobEntityError) -> ShelfError {
    match err {
        JobEntityError::ConflictingInit => ShelfError::new(
            ErrorCode::ConflictingInit,
            "Job already initialized with different parameters",
        ),
        JobEntityError::TerminalState { status } => ShelfError::new(
            ErrorCode::TerminalState,
            format!("Job already reached terminal state {status}"),
        ),
        JobEntityError::InvalidToken => {
            ShelfError::new(ErrorCode::Unauthorized, "Invalid or expired token")
        }
        JobEntityError::RefreshWindowNotOpen => ShelfError::new(
            ErrorCode::RefreshWindowNotOpen,
            "Token refresh window is not open yet",
        ),
        JobEntityError::InvalidPhotoIndex { index, total } => ShelfError::new(
            ErrorCode::InvalidPhotoIndex,
            format!("Photo index {index} outside batch of {total}"),
        ),
        JobEntityError::PipelineMismatch { .. } | JobEntityError::InvalidUpdate { .. } => {
            ShelfError::new(ErrorCode::InvalidRequest, err.to_string())
        }
        JobEntityError::Storage(_) => ShelfError::new(
            ErrorCode::InternalError,
            "Job state could not be persisted",
        ),
        JobEntityError::NotInitialized | JobEntityError::EntityGone => {
            ShelfError::new(ErrorCode::NotFound, "Unknown job")
        }
    }
}

/// Flatten a canonical book for the wire: the best edition's fields with
/// work-level holes (authors, description, tags) filled in.
pub(crate) fn flatten_book(book: &CanonicalBook) -> serde_json::Value {
    let mut flat = book
        .best_edition()
        .map(|e| serde_json::to_value(e).unwrap_or_default())
        .unwrap_or_else(|| json!({}));

    if let Some(object) = flat.as_object_mut() {
        object.insert(
            "authors".into(),
            serde_json::to_value(&book.work.authors).unwrap_or_default(),
        );
        if !object.contains_key("description") {
            if let Some(description) = &book.work.description {
                object.insert("description".into(), json!(description));
            }
        }
        if !book.work.subject_tags.is_empty() {
            object.insert(
                "subjectTags".into(),
                serde_json::to_value(&book.work.subject_tags).unwrap_or_default(),
            );
        }
        if !object.contains_key("coverImageUrl") {
            if let Some(cover) = &book.work.cover_image_url {
                object.insert("coverImageUrl".into(), json!(cover));
            }
        }
        object.insert("synthetic".into(), json!(book.work.synthetic));
        if object.get("title").and_then(|t| t.as_str()).is_none() {
            object.insert("title".into(), json!(book.work.title));
        }
    }
    flat
}

fn search_metadata(fetched: &Fetched<SearchOutcome>) -> ResponseMetadata {
    let mut metadata = ResponseMetadata::now(fetched.value.source.to_string(), fetched.cached)
        .with_extra("totalResults", json!(fetched.value.total_results));
    if !fetched.value.degraded.is_empty() {
        metadata.extra.insert(
            "degradedProviders".into(),
            serde_json::to_value(&fetched.value.degraded).unwrap_or_default(),
        );
    }
    metadata
}

fn cache_status(cached: bool) -> &'static str {
    if cached { "HIT" } else { "MISS" }
}

// ---------------------------------------------------------------------------
// Handlers: health and search
// ---------------------------------------------------------------------------

async fn cmd_health() -> Response {
    let data = json!({
        "status": "ok",
        "service": "shelfstack",
        "time": chrono::Utc::now().to_rfc3339(),
        "endpoints": [
            "GET /health",
            "GET /v1/search/title",
            "GET /v1/search/isbn",
            "GET /v1/search/author",
            "GET|POST /v1/search/advanced",
            "POST /api/enrichment/start",
            "POST /api/enrichment/cancel",
            "POST /api/scan-bookshelf",
            "POST /api/scan-bookshelf/batch",
            "POST /api/import/csv",
            "POST /api/token/refresh",
            "GET /ws/progress",
            "GET /metrics",
        ],
    });
    respond_ok(
        data,
        ResponseMetadata::now("shelfstack", false),
        "NONE",
        StatusCode::OK,
    )
}

async fn cmd_search_title(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = match validation::validate_query(params.get("q").map(String::as_str), "q") {
        Ok(q) => q,
        Err(err) => return respond_err(&err),
    };
    let max_results =
        match validation::validate_max_results(params.get("maxResults").map(String::as_str)) {
            Ok(n) => n,
            Err(err) => return respond_err(&err),
        };

    match state.engine.search_title(&query, max_results).await {
        Ok(fetched) => {
            let results: Vec<_> = fetched.value.results.iter().map(flatten_book).collect();
            let data = json!({
                "results": results,
                "totalResults": fetched.value.total_results,
            });
            let metadata = search_metadata(&fetched);
            respond_ok(data, metadata, cache_status(fetched.cached), StatusCode::OK)
        }
        Err(err) => respond_err(&engine_error(err)),
    }
}

async fn cmd_search_isbn(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let raw = match params.get("isbn") {
        Some(raw) => raw.as_str(),
        None => {
            return respond_err(&ShelfError::new(
                ErrorCode::InvalidIsbn,
                "ISBN must be 10 or 13 digits",
            ));
        }
    };
    let isbn = match validation::validate_isbn(raw) {
        Ok(isbn) => isbn,
        Err(err) => return respond_err(&err),
    };

    match state.engine.search_isbn(&isbn).await {
        Ok(fetched) => {
            let data = flatten_book(&fetched.value.book);
            let metadata =
                ResponseMetadata::now(fetched.value.source.to_string(), fetched.cached);
            respond_ok(data, metadata, cache_status(fetched.cached), StatusCode::OK)
        }
        Err(err) => respond_err(&engine_error(err)),
    }
}

async fn cmd_search_author(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let author = match validation::validate_query(params.get("q").map(String::as_str), "q") {
        Ok(q) => q,
        Err(err) => return respond_err(&err),
    };
    let limit = match params.get("limit").map(String::as_str) {
        None => 20,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(n) if n >= 1 => n.min(validation::MAX_AUTHOR_LIMIT),
            _ => {
                return respond_err(&ShelfError::new(
                    ErrorCode::InvalidRequest,
                    "limit must be a positive integer",
                ));
            }
        },
    };
    let offset = params
        .get("offset")
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let sort_by = params
        .get("sortBy")
        .map(|raw| SortBy::parse(raw))
        .unwrap_or_default();

    match state.engine.search_author(&author, limit, offset, sort_by).await {
        Ok(fetched) => {
            let results: Vec<_> = fetched.value.results.iter().map(flatten_book).collect();
            let data = json!({
                "results": results,
                "totalResults": fetched.value.total_results,
            });
            let metadata = search_metadata(&fetched);
            respond_ok(data, metadata, cache_status(fetched.cached), StatusCode::OK)
        }
        Err(err) => respond_err(&engine_error(err)),
    }
}

async fn cmd_search_advanced_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = AdvancedQuery {
        title: params.get("title").cloned().filter(|s| !s.trim().is_empty()),
        author: params.get("author").cloned().filter(|s| !s.trim().is_empty()),
        isbn: params.get("isbn").cloned().filter(|s| !s.trim().is_empty()),
        max_results: params
            .get("maxResults")
            .and_then(|raw| raw.trim().parse::<u32>().ok()),
    };
    run_advanced(state, query).await
}

async fn cmd_search_advanced_post(
    State(state): State<Arc<AppState>>,
    Json(query): Json<AdvancedQuery>,
) -> Response {
    run_advanced(state, query).await
}

async fn run_advanced(state: Arc<AppState>, mut query: AdvancedQuery) -> Response {
    if query.title.is_none() && query.author.is_none() && query.isbn.is_none() {
        return respond_err(&ShelfError::new(
            ErrorCode::InvalidRequest,
            "advanced search needs at least one of title, author, isbn",
        ));
    }
    if let Some(isbn) = &query.isbn {
        match validation::validate_isbn(isbn) {
            Ok(normalized) => query.isbn = Some(normalized),
            Err(err) => return respond_err(&err),
        }
    }
    query.max_results = Some(
        query
            .max_results
            .unwrap_or(validation::DEFAULT_MAX_RESULTS)
            .min(validation::MAX_MAX_RESULTS),
    );

    match state.engine.search_advanced(&query).await {
        Ok(fetched) => {
            let results: Vec<_> = fetched.value.results.iter().map(flatten_book).collect();
            let data = json!({
                "results": results,
                "totalResults": fetched.value.total_results,
            });
            let metadata = search_metadata(&fetched);
            respond_ok(data, metadata, cache_status(fetched.cached), StatusCode::OK)
        }
        Err(err) => respond_err(&engine_error(err)),
    }
}

// ---------------------------------------------------------------------------
// Handlers: metrics
// ---------------------------------------------------------------------------

async fn cmd_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let period_s = params
        .get("period")
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(3600);
    let summary = state.aggregator.summary(period_s);

    if params.get("format").map(String::as_str) == Some("prometheus") {
        let mut resp = render_prometheus(&summary).into_response();
        resp.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        return resp;
    }

    respond_ok(
        serde_json::to_value(&summary).unwrap_or_default(),
        ResponseMetadata::now("metrics", false),
        "NONE",
        StatusCode::OK,
    )
}
