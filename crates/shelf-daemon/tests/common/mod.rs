// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for daemon integration tests: real router, stubbed
//! providers, in-memory cache and job storage.
#![allow(dead_code)] // each test binary uses a different subset



use async_trait::async_trait;
use shelf_cache::{MemoryTier, TieredCache, TtlPolicy};
use shelf_core::{
    Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work,
};
use shelf_daemon::AppState;
use shelf_engine::{BookSource, Orchestrator};
use shelf_jobs::{JobConfig, JobRegistry, MemoryJobStore};
use shelf_pipelines::{
    CsvDriver, EnrichmentDriver, MemoryResultStore, PipelineConfig, RetryPolicy, ScanDriver,
    VolumeResolver,
};
use shelf_providers::{
    CsvBookRecord, CsvParseResult, CsvParser, DetectedBook, ErrorKind, ProviderError, ScanResult,
    TokenUsage, VisionProvider,
};
use shelf_ratelimit::{FailOpenLimiter, LimiterRegistry};
use shelf_telemetry::{MetricsAggregator, NullSink};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub fn canonical(
    provider: ProviderId,
    title: &str,
    author: &str,
    isbn: Option<&str>,
) -> CanonicalBook {
    let edition = Edition {
        isbn: isbn.map(String::from),
        isbns: isbn.map(String::from).into_iter().collect(),
        title: title.into(),
        publisher: Some("Scribner".into()),
        publication_date: Some("2004-09-30".into()),
        publication_year: Some(2004),
        page_count: Some(180),
        format: BookFormat::Paperback,
        cover_image_url: None,
        edition_title: None,
        edition_description: None,
        language: Some("en".into()),
        provenance: Provenance::single(provider),
    };
    CanonicalBook {
        work: Work {
            title: title.into(),
            authors: vec![Author::named(author)],
            subject_tags: BTreeSet::new(),
            original_language: Some("en".into()),
            first_publication_year: Some(1925),
            description: None,
            cover_image_url: None,
            synthetic: false,
            provenance: Provenance::single(provider),
        },
        editions: vec![edition],
    }
}

/// A source scripted per call kind, shared by the API and WS tests.
pub struct ScriptedSource {
    pub id: ProviderId,
    pub list_response: Result<Vec<CanonicalBook>, ErrorKind>,
    pub isbn_response: Result<CanonicalBook, ErrorKind>,
}

impl ScriptedSource {
    pub fn found(id: ProviderId, book: CanonicalBook) -> Arc<Self> {
        Arc::new(Self {
            id,
            list_response: Ok(vec![book.clone()]),
            isbn_response: Ok(book),
        })
    }

    pub fn failing(id: ProviderId, kind: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            list_response: Err(kind),
            isbn_response: Err(kind),
        })
    }

    fn err(&self, operation: &'static str, kind: ErrorKind) -> ProviderError {
        ProviderError::new(self.id, operation, kind, "scripted failure")
    }
}

#[async_trait]
impl BookSource for ScriptedSource {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn search_title(
        &self,
        _query: &str,
        _max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.list_response
            .clone()
            .map_err(|kind| self.err("search_title", kind))
    }

    async fn search_author(
        &self,
        _author: &str,
        _limit: u32,
        _offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.list_response
            .clone()
            .map_err(|kind| self.err("search_author", kind))
    }

    async fn search_isbn(&self, _isbn: &str) -> Result<CanonicalBook, ProviderError> {
        self.isbn_response
            .clone()
            .map_err(|kind| self.err("search_isbn", kind))
    }
}

pub struct StubVision;

#[async_trait]
impl VisionProvider for StubVision {
    async fn scan_image(
        &self,
        _image: &[u8],
        _content_type: &str,
    ) -> Result<ScanResult, ProviderError> {
        Ok(ScanResult {
            books: vec![
                DetectedBook {
                    title: "The Great Gatsby".into(),
                    author: Some("F. Scott Fitzgerald".into()),
                    isbn: Some("9780743273565".into()),
                },
                DetectedBook {
                    title: "Emma".into(),
                    author: Some("Jane Austen".into()),
                    isbn: None,
                },
            ],
            usage: TokenUsage {
                prompt_tokens: 900,
                completion_tokens: 120,
            },
            model: "vision-stub-001".into(),
        })
    }
}

pub struct StubCsv;

#[async_trait]
impl CsvParser for StubCsv {
    async fn parse_csv(&self, _text: &str) -> Result<CsvParseResult, ProviderError> {
        Ok(CsvParseResult {
            records: vec![
                CsvBookRecord {
                    title: "Emma".into(),
                    author: Some("Jane Austen".into()),
                    isbn: None,
                },
                CsvBookRecord {
                    title: "Persuasion".into(),
                    author: Some("Jane Austen".into()),
                    isbn: None,
                },
            ],
            usage: TokenUsage::default(),
            model: "csv-stub-001".into(),
        })
    }
}

pub struct StubResolver;

#[async_trait]
impl VolumeResolver for StubResolver {
    async fn by_volume_id(&self, _volume_id: &str) -> Result<CanonicalBook, ProviderError> {
        Ok(canonical(
            ProviderId::GoogleBooks,
            "Resolved Volume",
            "Volume Author",
            Some("9780743273565"),
        ))
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryJobStore>,
}

pub struct HarnessOptions {
    pub search_chain: Vec<Arc<dyn BookSource>>,
    pub isbn_chain: Vec<Arc<dyn BookSource>>,
    pub rate_limit_max: u32,
    pub job_config: JobConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        let gatsby = ScriptedSource::found(
            ProviderId::GoogleBooks,
            canonical(
                ProviderId::GoogleBooks,
                "The Great Gatsby",
                "F. Scott Fitzgerald",
                Some("9780743273565"),
            ),
        );
        Self {
            search_chain: vec![gatsby.clone()],
            isbn_chain: vec![gatsby],
            rate_limit_max: 1000,
            job_config: JobConfig {
                persist_every_n: 1,
                ready_timeout: Duration::from_millis(100),
                ..JobConfig::default()
            },
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let cache = Arc::new(TieredCache::new(
        vec![Arc::new(MemoryTier::new())],
        TtlPolicy::default(),
        Arc::new(NullSink),
    ));
    let engine = Arc::new(Orchestrator::new(
        options.search_chain,
        options.isbn_chain,
        cache,
        Arc::new(NullSink),
        50,
    ));
    let store = Arc::new(MemoryJobStore::new());
    let jobs = Arc::new(JobRegistry::new(store.clone(), options.job_config.clone()));
    let results = Arc::new(MemoryResultStore::new());
    let pipeline_config = PipelineConfig {
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(5),
        },
        result_spill_bytes: 1024 * 1024,
    };

    let scan = Arc::new(ScanDriver::new(
        Arc::new(StubVision),
        engine.clone(),
        jobs.clone(),
        results.clone(),
        pipeline_config.clone(),
    ));
    let csv = Arc::new(CsvDriver::new(
        Arc::new(StubCsv),
        engine.clone(),
        jobs.clone(),
        results.clone(),
        pipeline_config.clone(),
    ));
    let enrich = Arc::new(EnrichmentDriver::new(
        engine.clone(),
        Arc::new(StubResolver),
        jobs.clone(),
        results,
        pipeline_config,
    ));

    let state = Arc::new(AppState {
        engine,
        jobs,
        scan,
        csv,
        enrich,
        limiter: FailOpenLimiter::new(LimiterRegistry::new(options.rate_limit_max, 60)),
        metrics: Arc::new(NullSink),
        aggregator: Arc::new(MetricsAggregator::new()),
        job_config: options.job_config,
    });

    Harness { state, store }
}
