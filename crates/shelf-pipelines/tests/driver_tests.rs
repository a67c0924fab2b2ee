// SPDX-License-Identifier: MIT OR Apache-2.0
//! Driver behavior end to end against stubbed providers.

use async_trait::async_trait;
use serde_json::json;
use shelf_cache::{MemoryTier, TieredCache, TtlPolicy};
use shelf_core::{
    Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work,
};
use shelf_engine::{BookSource, Orchestrator};
use shelf_jobs::{
    FrameType, JobConfig, JobRegistry, JobStatus, JobStore, MemoryJobStore, Pipeline,
    ProgressEnvelope, ProgressSink, SinkError,
};
use shelf_pipelines::{
    BatchImage, CsvDriver, EnrichmentDriver, MemoryResultStore, PipelineConfig, RetryPolicy,
    ScanDriver, VolumeResolver,
};
use shelf_providers::{
    CsvBookRecord, CsvParseResult, CsvParser, DetectedBook, ErrorKind, ProviderError, ScanResult,
    TokenUsage, VisionProvider,
};
use shelf_telemetry::NullSink;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

fn canonical(title: &str, author: &str, isbn: Option<&str>) -> CanonicalBook {
    let edition = Edition {
        isbn: isbn.map(String::from),
        isbns: isbn.map(String::from).into_iter().collect(),
        title: title.into(),
        publisher: Some("Test House".into()),
        publication_date: None,
        publication_year: Some(2018),
        page_count: Some(320),
        format: BookFormat::Hardcover,
        cover_image_url: None,
        edition_title: None,
        edition_description: None,
        language: Some("en".into()),
        provenance: Provenance::single(ProviderId::GoogleBooks),
    };
    CanonicalBook {
        work: Work {
            title: title.into(),
            authors: vec![Author::named(author)],
            subject_tags: BTreeSet::new(),
            original_language: Some("en".into()),
            first_publication_year: Some(2018),
            description: None,
            cover_image_url: None,
            synthetic: false,
            provenance: Provenance::single(ProviderId::GoogleBooks),
        },
        editions: vec![edition],
    }
}

/// Source that answers every lookup with a book named after the query.
struct EchoSource;

#[async_trait]
impl BookSource for EchoSource {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleBooks
    }

    async fn search_title(
        &self,
        query: &str,
        _max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        Ok(vec![canonical(query, "Echo Author", None)])
    }

    async fn search_author(
        &self,
        author: &str,
        _limit: u32,
        _offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        Ok(vec![canonical("Echo Title", author, None)])
    }

    async fn search_isbn(&self, isbn: &str) -> Result<CanonicalBook, ProviderError> {
        Ok(canonical("Echo Book", "Echo Author", Some(isbn)))
    }
}

struct StubVision {
    books: Vec<DetectedBook>,
    failures_before_success: u32,
    calls: AtomicU32,
}

#[async_trait]
impl VisionProvider for StubVision {
    async fn scan_image(
        &self,
        _image: &[u8],
        _content_type: &str,
    ) -> Result<ScanResult, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(ProviderError::new(
                ProviderId::AiVision,
                "scan_image",
                ErrorKind::Unavailable,
                "stub outage",
            ));
        }
        Ok(ScanResult {
            books: self.books.clone(),
            usage: TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 100,
            },
            model: "vision-stub-001".into(),
        })
    }
}

struct StubCsvParser {
    records: Vec<CsvBookRecord>,
}

#[async_trait]
impl CsvParser for StubCsvParser {
    async fn parse_csv(&self, _text: &str) -> Result<CsvParseResult, ProviderError> {
        Ok(CsvParseResult {
            records: self.records.clone(),
            usage: TokenUsage::default(),
            model: "csv-stub-001".into(),
        })
    }
}

struct StubResolver;

#[async_trait]
impl VolumeResolver for StubResolver {
    async fn by_volume_id(&self, volume_id: &str) -> Result<CanonicalBook, ProviderError> {
        if volume_id == "missing" {
            return Err(ProviderError::new(
                ProviderId::GoogleBooks,
                "get_by_volume_id",
                ErrorKind::NotFound,
                "no such volume",
            ));
        }
        Ok(canonical("Resolved Volume", "Volume Author", Some("9780743273565")))
    }
}

struct FrameSink {
    frames: mpsc::UnboundedSender<ProgressEnvelope>,
}

#[async_trait]
impl ProgressSink for FrameSink {
    async fn send(&mut self, envelope: &ProgressEnvelope) -> Result<(), SinkError> {
        self.frames
            .send(envelope.clone())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: Arc<Orchestrator>,
    jobs: Arc<JobRegistry>,
    results: Arc<MemoryResultStore>,
    store: Arc<MemoryJobStore>,
    config: PipelineConfig,
}

fn harness() -> Harness {
    let cache = Arc::new(TieredCache::new(
        vec![Arc::new(MemoryTier::new())],
        TtlPolicy::default(),
        Arc::new(NullSink),
    ));
    let source: Arc<dyn BookSource> = Arc::new(EchoSource);
    let engine = Arc::new(Orchestrator::new(
        vec![source.clone()],
        vec![source],
        cache,
        Arc::new(NullSink),
        50,
    ));
    let store = Arc::new(MemoryJobStore::new());
    let jobs = Arc::new(JobRegistry::new(
        store.clone(),
        JobConfig {
            persist_every_n: 1,
            ready_timeout: Duration::from_millis(50),
            ..JobConfig::default()
        },
    ));
    Harness {
        engine,
        jobs,
        results: Arc::new(MemoryResultStore::new()),
        store,
        config: PipelineConfig {
            retry: RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(5),
            },
            result_spill_bytes: 256 * 1024,
        },
    }
}

// ---------------------------------------------------------------------------
// AI scan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_walks_progress_to_completion() {
    let h = harness();
    let vision = Arc::new(StubVision {
        books: vec![
            DetectedBook {
                title: "Dune".into(),
                author: Some("Frank Herbert".into()),
                isbn: None,
            },
            DetectedBook {
                title: "Emma".into(),
                author: Some("Jane Austen".into()),
                isbn: Some("9780141439587".into()),
            },
        ],
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    });
    let driver = ScanDriver::new(
        vision,
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    let handle = h.jobs.handle(job_id).await;
    handle.initialize(Pipeline::AiScan, 0).await.unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let generation = handle
        .attach_peer(Box::new(FrameSink { frames: frames_tx }))
        .await
        .unwrap();
    handle.client_ready(generation).await;

    driver.run(job_id, vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg".into()).await;

    let state = handle.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    let result = state.result.unwrap();
    assert_eq!(result["totalDetected"], 2);
    assert_eq!(result["approved"], 2);
    assert!(result["books"].is_array());

    // Frames: ready_ack, then strictly increasing progress through 0.5,
    // then job_complete.
    let mut progress_values = Vec::new();
    let mut saw_complete = false;
    while let Ok(frame) = frames_rx.try_recv() {
        match frame.frame {
            FrameType::JobProgress => {
                progress_values.push(frame.payload["progress"].as_f64().unwrap());
            }
            FrameType::JobComplete => saw_complete = true,
            _ => {}
        }
    }
    assert!(saw_complete);
    assert!(progress_values.len() >= 3, "got {progress_values:?}");
    assert!(progress_values.windows(2).all(|w| w[0] < w[1]), "{progress_values:?}");
    assert!(progress_values.iter().any(|&p| p >= 0.5));
}

#[tokio::test]
async fn scan_retries_transient_vision_outages() {
    let h = harness();
    let vision = Arc::new(StubVision {
        books: vec![DetectedBook {
            title: "Dune".into(),
            author: None,
            isbn: None,
        }],
        failures_before_success: 2,
        calls: AtomicU32::new(0),
    });
    let driver = ScanDriver::new(
        vision.clone(),
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    driver.run(job_id, vec![1, 2, 3], "image/png".into()).await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(vision.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scan_rejects_non_images_without_calling_vision() {
    let h = harness();
    let vision = Arc::new(StubVision {
        books: vec![],
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    });
    let driver = ScanDriver::new(
        vision.clone(),
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    driver.run(job_id, b"not an image".to_vec(), "text/plain".into()).await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.error.unwrap().code, "INVALID_REQUEST");
    assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn canceled_scan_stops_and_stays_canceled() {
    let h = harness();
    let vision = Arc::new(StubVision {
        books: vec![DetectedBook {
            title: "Dune".into(),
            author: None,
            isbn: None,
        }],
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    });
    let driver = ScanDriver::new(
        vision,
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    let handle = h.jobs.handle(job_id).await;
    handle.initialize(Pipeline::AiScan, 0).await.unwrap();
    handle.cancel(Some("client aborted".into())).await.unwrap();

    driver.run(job_id, vec![1, 2, 3], "image/jpeg".into()).await;

    let state = handle.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Canceled);
    assert!(state.canceled);
}

#[tokio::test]
async fn batch_scan_fills_photo_slots() {
    let h = harness();
    let vision = Arc::new(StubVision {
        books: vec![DetectedBook {
            title: "Dune".into(),
            author: None,
            isbn: None,
        }],
        failures_before_success: 0,
        calls: AtomicU32::new(0),
    });
    let driver = ScanDriver::new(
        vision,
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    driver
        .run_batch(
            job_id,
            vec![
                BatchImage {
                    index: 0,
                    data: vec![1, 2, 3],
                    content_type: "image/jpeg".into(),
                },
                BatchImage {
                    index: 1,
                    data: vec![],
                    content_type: "image/jpeg".into(),
                },
            ],
        )
        .await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    let photos = state.photos.unwrap();
    assert_eq!(photos[0].books_found, 1);
    assert_eq!(photos[1].status, shelf_jobs::PhotoStatus::Failed);
    let result = state.result.unwrap();
    assert_eq!(result["totalBooksFound"], 1);
    assert!(result["photoResults"].is_array());
}

// ---------------------------------------------------------------------------
// CSV import
// ---------------------------------------------------------------------------

#[tokio::test]
async fn csv_import_reports_success_rate() {
    use base64::Engine as _;

    let h = harness();
    let parser = Arc::new(StubCsvParser {
        records: vec![
            CsvBookRecord {
                title: "Emma".into(),
                author: Some("Jane Austen".into()),
                isbn: Some("9780141439587".into()),
            },
            CsvBookRecord {
                title: "Persuasion".into(),
                author: Some("Jane Austen".into()),
                isbn: None,
            },
        ],
    });
    let driver = CsvDriver::new(
        parser,
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    let body = base64::engine::general_purpose::STANDARD
        .encode("title,author\nEmma,Jane Austen\nPersuasion,Jane Austen\n");
    driver.run(job_id, body).await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.processed_count, 2);
    let result = state.result.unwrap();
    assert_eq!(result["booksCount"], 2);
    assert_eq!(result["successRate"], "2/2");
}

#[tokio::test]
async fn csv_import_rejects_bad_base64() {
    let h = harness();
    let parser = Arc::new(StubCsvParser { records: vec![] });
    let driver = CsvDriver::new(
        parser,
        h.engine.clone(),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    driver.run(job_id, "@@not-base64@@".into()).await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert_eq!(state.error.unwrap().code, "INVALID_REQUEST");
}

// ---------------------------------------------------------------------------
// Batch enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrichment_aggregates_failures_without_failing_the_job() {
    let h = harness();
    let driver = EnrichmentDriver::new(
        h.engine.clone(),
        Arc::new(StubResolver),
        h.jobs.clone(),
        h.results.clone(),
        h.config.clone(),
    );

    let job_id = Uuid::new_v4();
    driver
        .run(
            job_id,
            vec!["vol-1".into(), "missing".into()],
            vec!["9780743273565".into()],
        )
        .await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.processed_count, 3);
    let result = state.result.unwrap();
    assert_eq!(result["successCount"], 2);
    assert_eq!(result["failureCount"], 1);
    assert_eq!(result["failed"][0]["ref"], "missing");
}

/// Source that rate limits every call and counts how often it is asked.
struct RateLimitedSource {
    calls: AtomicU32,
}

#[async_trait]
impl BookSource for RateLimitedSource {
    fn id(&self) -> ProviderId {
        ProviderId::Isbndb
    }

    async fn search_title(
        &self,
        _query: &str,
        _max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::new(
            ProviderId::Isbndb,
            "search_title",
            ErrorKind::RateLimited,
            "quota exhausted",
        ))
    }

    async fn search_author(
        &self,
        _author: &str,
        _limit: u32,
        _offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::new(
            ProviderId::Isbndb,
            "search_author",
            ErrorKind::RateLimited,
            "quota exhausted",
        ))
    }

    async fn search_isbn(&self, _isbn: &str) -> Result<CanonicalBook, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::new(
            ProviderId::Isbndb,
            "search_isbn",
            ErrorKind::RateLimited,
            "quota exhausted",
        ))
    }
}

#[tokio::test]
async fn rate_limited_provider_sits_out_the_rest_of_the_job() {
    let limited = Arc::new(RateLimitedSource {
        calls: AtomicU32::new(0),
    });
    let cache = Arc::new(TieredCache::new(
        vec![Arc::new(MemoryTier::new())],
        TtlPolicy::default(),
        Arc::new(NullSink),
    ));
    let echo: Arc<dyn BookSource> = Arc::new(EchoSource);
    let engine = Arc::new(Orchestrator::new(
        vec![echo.clone()],
        vec![limited.clone(), echo],
        cache,
        Arc::new(NullSink),
        50,
    ));
    let store = Arc::new(MemoryJobStore::new());
    let jobs = Arc::new(JobRegistry::new(
        store,
        JobConfig {
            persist_every_n: 1,
            ready_timeout: Duration::from_millis(50),
            ..JobConfig::default()
        },
    ));
    let driver = EnrichmentDriver::new(
        engine,
        Arc::new(StubResolver),
        jobs.clone(),
        Arc::new(MemoryResultStore::new()),
        PipelineConfig {
            retry: RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(5),
            },
            result_spill_bytes: 256 * 1024,
        },
    );

    let job_id = Uuid::new_v4();
    driver
        .run(
            job_id,
            vec![],
            vec![
                "9780743273565".into(),
                "9780141439587".into(),
                "9780441013593".into(),
            ],
        )
        .await;

    let state = jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.result.unwrap()["successCount"], 3);
    // The first item records the rate limit; items two and three never
    // ask that provider again.
    assert_eq!(limited.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn large_results_spill_to_the_object_store() {
    let h = harness();
    let config = PipelineConfig {
        result_spill_bytes: 64, // force the spill
        ..h.config.clone()
    };
    let driver = EnrichmentDriver::new(
        h.engine.clone(),
        Arc::new(StubResolver),
        h.jobs.clone(),
        h.results.clone(),
        config,
    );

    let job_id = Uuid::new_v4();
    driver.run(job_id, vec![], vec!["9780743273565".into()]).await;

    let state = h.jobs.handle(job_id).await.get_state().await.unwrap().unwrap();
    let result = state.result.unwrap();
    assert!(result.get("results").is_none());
    let url = result["resultsUrl"].as_str().unwrap();
    assert!(url.contains(&job_id.to_string()));
    assert!(h.results.body_of(job_id).await.is_some());

    // Persisted snapshot matches what the entity reports.
    let stored = h.store.load(job_id).await.unwrap().unwrap();
    assert_eq!(stored.state.status, JobStatus::Completed);
}
