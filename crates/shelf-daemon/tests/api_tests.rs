// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP API behavior through the full router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{Harness, HarnessOptions, ScriptedSource, canonical, harness};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shelf_jobs::JobStore;
use shelf_core::ProviderId;
use shelf_jobs::{JobConfig, JobStatus};
use shelf_providers::ErrorKind;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn call(harness: &Harness, request: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
    let app = shelf_daemon::build_app(harness.state.clone());
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body, headers)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_lists_endpoints() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(&h, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["data"]["endpoints"].as_array().unwrap().len() >= 10);
    assert!(body.get("error").is_none());
}

// ---------------------------------------------------------------------------
// ISBN search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn isbn_success_then_cache_hit() {
    let h = harness(HarnessOptions::default());

    let (status, body, headers) =
        call(&h, get("/v1/search/isbn?isbn=9780743273565")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isbn"], "9780743273565");
    assert_eq!(body["data"]["title"], "The Great Gatsby");
    assert_eq!(body["metadata"]["source"], "google_books");
    assert_eq!(body["metadata"]["cached"], false);
    assert_eq!(headers.get("x-cache-status").unwrap(), "MISS");
    assert!(headers.get("x-response-time").is_some());
    assert!(headers.get("x-request-id").is_some());

    let (status, body, headers) =
        call(&h, get("/v1/search/isbn?isbn=9780743273565")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["cached"], true);
    assert_eq!(headers.get("x-cache-status").unwrap(), "HIT");
}

#[tokio::test]
async fn hyphenated_isbn_hits_the_same_cache_entry() {
    let h = harness(HarnessOptions::default());
    call(&h, get("/v1/search/isbn?isbn=9780743273565")).await;
    let (_, body, headers) =
        call(&h, get("/v1/search/isbn?isbn=978-0-7432-7356-5")).await;
    assert_eq!(body["metadata"]["cached"], true);
    assert_eq!(headers.get("x-cache-status").unwrap(), "HIT");
}

#[tokio::test]
async fn invalid_isbn_is_a_400_with_the_exact_body() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(&h, get("/v1/search/isbn?isbn=invalid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "error": {
                "code": "INVALID_ISBN",
                "message": "ISBN must be 10 or 13 digits",
                "statusCode": 400
            }
        })
    );
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn isbn_not_found_after_full_chain_is_404() {
    let options = HarnessOptions {
        isbn_chain: vec![
            ScriptedSource::failing(ProviderId::GoogleBooks, ErrorKind::NotFound),
            ScriptedSource::failing(ProviderId::OpenLibrary, ErrorKind::NotFound),
        ],
        ..HarnessOptions::default()
    };
    let h = harness(options);
    let (status, body, _) = call(&h, get("/v1/search/isbn?isbn=9780345391803")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn all_providers_down_is_a_502() {
    let options = HarnessOptions {
        isbn_chain: vec![
            ScriptedSource::failing(ProviderId::GoogleBooks, ErrorKind::Unavailable),
            ScriptedSource::failing(ProviderId::OpenLibrary, ErrorKind::Timeout),
        ],
        ..HarnessOptions::default()
    };
    let h = harness(options);
    let (status, body, _) = call(&h, get("/v1/search/isbn?isbn=9780345391803")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "PROVIDER_ERROR");
}

// ---------------------------------------------------------------------------
// Title search and fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn title_search_returns_results() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) =
        call(&h, get("/v1/search/title?q=The%20Great%20Gatsby")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["results"][0]["title"], "The Great Gatsby");
    assert_eq!(body["metadata"]["totalResults"], 1);
}

#[tokio::test]
async fn primary_timeout_falls_back_to_secondary() {
    let options = HarnessOptions {
        search_chain: vec![
            ScriptedSource::failing(ProviderId::GoogleBooks, ErrorKind::Timeout),
            ScriptedSource::found(
                ProviderId::OpenLibrary,
                canonical(
                    ProviderId::OpenLibrary,
                    "Harry Potter and the Philosopher's Stone",
                    "J. K. Rowling",
                    Some("9780747532699"),
                ),
            ),
        ],
        ..HarnessOptions::default()
    };
    let h = harness(options);
    let (status, body, _) = call(
        &h,
        get("/v1/search/title?q=Harry%20Potter%20and%20the%20Philosopher%27s%20Stone"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["results"][0]["title"],
        "Harry Potter and the Philosopher's Stone"
    );
    assert_eq!(body["metadata"]["source"], "open_library");
}

#[tokio::test]
async fn missing_query_and_bad_max_results_are_400() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(&h, get("/v1/search/title")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");

    let (status, _, _) = call(&h, get("/v1/search/title?q=dune&maxResults=zero")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn advanced_search_accepts_post_bodies() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(
        &h,
        post_json(
            "/v1/search/advanced",
            json!({"title": "The Great Gatsby", "author": "Fitzgerald"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["results"][0]["title"], "The Great Gatsby");
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eleventh_request_in_the_window_is_429() {
    let options = HarnessOptions {
        rate_limit_max: 10,
        ..HarnessOptions::default()
    };
    let h = harness(options);

    for i in 0..10 {
        let request = Request::builder()
            .uri("/v1/search/title?q=dune")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        let (status, _, headers) = call(&h, request).await;
        assert_eq!(status, StatusCode::OK, "request {i}");
        assert!(headers.get("x-ratelimit-remaining").is_some());
    }

    let request = Request::builder()
        .uri("/v1/search/title?q=dune")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let (status, body, headers) = call(&h, request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    let retry_after: u64 = headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");

    // A different client is unaffected.
    let request = Request::builder()
        .uri("/v1/search/title?q=dune")
        .header("x-forwarded-for", "203.0.113.8")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = call(&h, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_exempt_from_rate_limiting() {
    let options = HarnessOptions {
        rate_limit_max: 1,
        ..HarnessOptions::default()
    };
    let h = harness(options);
    for _ in 0..5 {
        let (status, _, _) = call(&h, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ---------------------------------------------------------------------------
// Pipeline starts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrichment_start_returns_202_with_token() {
    let h = harness(HarnessOptions::default());
    let job_id = Uuid::new_v4();
    let (status, body, _) = call(
        &h,
        post_json(
            "/api/enrichment/start",
            json!({"jobId": job_id, "isbns": ["9780743273565"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["jobId"], job_id.to_string());
    assert_eq!(body["data"]["status"], "started");
    assert!(body["data"]["token"].as_str().unwrap().parse::<Uuid>().is_ok());
    assert!(
        body["data"]["websocketUrl"]
            .as_str()
            .unwrap()
            .contains(&job_id.to_string())
    );

    // The driver runs to completion in the background.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(job) = h.store.load(job_id).await.unwrap() {
            if job.state.status == JobStatus::Completed {
                assert_eq!(job.state.result.as_ref().unwrap()["successCount"], 1);
                return;
            }
        }
    }
    panic!("enrichment job never completed");
}

#[tokio::test]
async fn csv_import_runs_to_completion() {
    use base64::Engine as _;

    let h = harness(HarnessOptions::default());
    let job_id = Uuid::new_v4();
    let csv = base64::engine::general_purpose::STANDARD.encode("title,author\nEmma,Jane Austen\n");
    let (status, body, _) = call(
        &h,
        post_json("/api/import/csv", json!({"jobId": job_id, "csvBase64": csv})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["pipeline"], "csv_import");

    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(job) = h.store.load(job_id).await.unwrap() {
            if job.state.status == JobStatus::Completed {
                assert_eq!(job.state.result.as_ref().unwrap()["successRate"], "2/2");
                return;
            }
        }
    }
    panic!("csv job never completed");
}

#[tokio::test]
async fn pipeline_starts_reject_bad_job_ids_and_empty_bodies() {
    let h = harness(HarnessOptions::default());

    let (status, body, _) = call(
        &h,
        post_json(
            "/api/enrichment/start",
            json!({"jobId": "not-a-uuid", "isbns": ["9780743273565"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");

    let (status, body, _) = call(
        &h,
        post_json(
            "/api/enrichment/start",
            json!({"jobId": Uuid::new_v4(), "isbns": []}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn cancel_unknown_job_is_404() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(
        &h,
        post_json("/api/enrichment/cancel", json!({"jobId": Uuid::new_v4()})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Token refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_immediately_is_403_window_not_open() {
    let h = harness(HarnessOptions::default());
    let job_id = Uuid::new_v4();
    let (_, body, _) = call(
        &h,
        post_json(
            "/api/enrichment/start",
            json!({"jobId": job_id, "isbns": ["9780743273565"]}),
        ),
    )
    .await;
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body, _) = call(
        &h,
        post_json("/api/token/refresh", json!({"jobId": job_id, "token": token})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "REFRESH_WINDOW_NOT_OPEN");
}

#[tokio::test]
async fn refresh_inside_window_rotates_and_invalidates_old() {
    // Short TTL with an equal refresh window: open immediately.
    let options = HarnessOptions {
        job_config: JobConfig {
            persist_every_n: 1,
            token_ttl: Duration::from_secs(2),
            refresh_window: Duration::from_secs(2),
            ready_timeout: Duration::from_millis(100),
            ..JobConfig::default()
        },
        ..HarnessOptions::default()
    };
    let h = harness(options);
    let job_id = Uuid::new_v4();
    let (_, body, _) = call(
        &h,
        post_json(
            "/api/enrichment/start",
            json!({"jobId": job_id, "isbns": ["9780743273565"]}),
        ),
    )
    .await;
    let old_token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body, _) = call(
        &h,
        post_json(
            "/api/token/refresh",
            json!({"jobId": job_id, "token": old_token}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_token = body["data"]["token"].as_str().unwrap().to_string();
    assert_ne!(new_token, old_token);
    assert_eq!(body["data"]["expiresIn"], 2);

    // The superseded token no longer refreshes.
    let (status, body, _) = call(
        &h,
        post_json(
            "/api/token/refresh",
            json!({"jobId": job_id, "token": old_token}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn refresh_for_unknown_job_is_401() {
    let h = harness(HarnessOptions::default());
    let (status, body, _) = call(
        &h,
        post_json(
            "/api/token/refresh",
            json!({"jobId": Uuid::new_v4(), "token": Uuid::new_v4()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_render_json_and_prometheus() {
    let h = harness(HarnessOptions::default());
    call(&h, get("/v1/search/title?q=dune")).await;

    let (status, body, _) = call(&h, get("/metrics?period=3600")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].get("requests").is_some());

    let app = shelf_daemon::build_app(h.state.clone());
    let response = app
        .oneshot(get("/metrics?format=prometheus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}
