// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the Shelfstack HTTP API.

use crate::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use shelf_core::envelope::ApiEnvelope;
use shelf_error::ErrorCode;
use shelf_telemetry::{MetricEvent, anonymize_ip};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generates a [`RequestId`] per request and echoes it as
/// `X-Request-Id`.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

// ---------------------------------------------------------------------------
// Request logging, timing, analytics
// ---------------------------------------------------------------------------

/// Logs each request, sets `X-Response-Time`, and emits the sampled
/// request metric (with anonymized client IP, honoring the opt-outs).
pub async fn observe_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let client_ip = client_ip_of(&req);
    let skip_analytics = req
        .headers()
        .get("dnt")
        .is_some_and(|v| v.as_bytes() == b"1")
        || req
            .headers()
            .get("x-skip-analytics")
            .is_some_and(|v| v.as_bytes() == b"true");
    let start = Instant::now();

    let mut resp = next.run(req).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let status = resp.status().as_u16();
    if let Ok(value) = HeaderValue::from_str(&duration_ms.to_string()) {
        resp.headers_mut().insert("x-response-time", value);
    }

    info!(
        http.method = %method,
        http.path = %path,
        http.status = status,
        http.duration_ms = duration_ms,
        "request completed"
    );

    if !skip_analytics {
        let cached = resp
            .headers()
            .get("x-cache-status")
            .is_some_and(|v| v.as_bytes() == b"HIT");
        state.metrics.record(MetricEvent::Request {
            endpoint: path,
            status,
            latency_ms: duration_ms,
            client_ip: Some(anonymize_ip(&client_ip)),
            cached,
        });
    }

    resp
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Per-client fixed-window limiting on the API surface. Health, metrics,
/// and the WebSocket upgrade stay exempt.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if !(path.starts_with("/v1/") || path.starts_with("/api/")) {
        return next.run(req).await;
    }

    let client = client_ip_of(&req);
    let decision = state.limiter.check_and_increment(&client).await;

    if !decision.allowed {
        let retry_after = decision.retry_after_s.unwrap_or(1);
        let body = ApiEnvelope::<()>::failure(
            ErrorCode::RateLimitExceeded.as_str(),
            "Rate limit exceeded, slow down",
            429,
        );
        let mut resp = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(body),
        )
            .into_response();
        set_rate_headers(&mut resp, decision.limit, 0, decision.reset_at);
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            resp.headers_mut().insert("retry-after", value);
        }
        return resp;
    }

    let mut resp = next.run(req).await;
    set_rate_headers(&mut resp, decision.limit, decision.remaining, decision.reset_at);
    resp
}

fn set_rate_headers(resp: &mut Response, limit: u32, remaining: u32, reset_at_ms: i64) {
    let headers = [
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", remaining.to_string()),
        ("x-ratelimit-reset", (reset_at_ms / 1000).to_string()),
    ];
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            resp.headers_mut().insert(name, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Client IP
// ---------------------------------------------------------------------------

/// The client address for rate limiting: the first `X-Forwarded-For`
/// entry when present, else the socket peer, else `"unknown"`.
pub fn client_ip_of(req: &Request<Body>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

/// Permissive CORS for the public API.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}
