// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use shelf_cache::{CacheTier, EdgeTier, KvTier, ObjectTier, TieredCache, TtlPolicy};
use shelf_config::{EnvSecrets, SecretSource, SecretString, VaultSecrets, load_config};
use shelf_daemon::{AppState, build_app};
use shelf_engine::{
    BookSource, GoogleBooksSource, IsbndbSource, OpenLibrarySource, Orchestrator,
};
use shelf_jobs::{FsJobStore, JobConfig, JobRegistry};
use shelf_pipelines::{
    CsvDriver, EnrichmentDriver, FsResultStore, GoogleVolumeResolver, PipelineConfig, RetryPolicy,
    ScanDriver,
};
use shelf_providers::{
    CsvParseClient, GoogleBooksClient, HttpBackend, IsbndbClient, OpenLibraryClient,
    ReqwestBackend, VisionClient,
};
use shelf_ratelimit::{FailOpenLimiter, LimiterRegistry};
use shelf_telemetry::{ChannelSink, MetricsAggregator, MetricsSink, SampledSink, Sampler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shelf-daemon", version, about = "Shelfstack book-tracking service")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("shelf=debug,tower_http=debug")
    } else {
        EnvFilter::new("shelf=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config, warnings) = load_config(args.config.as_deref())?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    // Secrets come from Vault when configured, else plain env.
    let secrets: Arc<dyn SecretSource> = match (
        std::env::var("SHELF_VAULT_ADDR").ok(),
        std::env::var("SHELF_VAULT_TOKEN").ok(),
    ) {
        (Some(addr), Some(token)) => {
            info!(vault = %addr, "reading secrets from vault");
            Arc::new(VaultSecrets::new(addr, SecretString::new(token)))
        }
        _ => Arc::new(EnvSecrets),
    };
    let google_key = optional_secret(secrets.as_ref(), "GOOGLE_BOOKS_API_KEY").await;
    let isbndb_key = optional_secret(secrets.as_ref(), "ISBNDB_API_KEY").await;
    let ai_key = optional_secret(secrets.as_ref(), "AI_API_KEY").await;

    let backend: Arc<dyn HttpBackend> =
        Arc::new(ReqwestBackend::new().context("http client init")?);
    let catalog_timeout = Duration::from_millis(config.provider_timeout_ms);
    let ai_timeout = Duration::from_millis(config.ai_timeout_ms);

    // Telemetry: aggregator behind a sampled, bounded, non-blocking sink.
    let aggregator = Arc::new(MetricsAggregator::new());
    let sampler = Sampler::new(&config.analytics_sampling);
    let metrics: Arc<dyn MetricsSink> = Arc::new(SampledSink::new(
        ChannelSink::spawn(Arc::clone(&aggregator)),
        sampler,
    ));

    // Cache tiers: edge always, kv when Redis is configured, object last.
    let mut tiers: Vec<Arc<dyn CacheTier>> = vec![Arc::new(EdgeTier::new(
        10_000,
        Duration::from_secs(config.edge_ttl_s),
    ))];
    if let Some(redis_url) = &config.redis_url {
        match KvTier::connect(redis_url).await {
            Ok(kv) => tiers.push(Arc::new(kv)),
            Err(err) => warn!(error = %err, "redis unavailable, warm tier disabled"),
        }
    }
    tiers.push(Arc::new(ObjectTier::new(
        &config.object_store_dir,
        Duration::from_secs(config.cold_index_ttl_s),
    )));

    let policy = TtlPolicy {
        title: Duration::from_secs(config.kv_ttl_title_s),
        isbn: Duration::from_secs(config.kv_ttl_isbn_s),
        author: Duration::from_secs(config.kv_ttl_author_s),
        cover: Duration::from_secs(config.kv_ttl_cover_s),
    };
    let cache = Arc::new(TieredCache::new(tiers, policy, Arc::clone(&metrics)));

    // Provider clients and the canonical sources.
    let google_client = Arc::new(
        GoogleBooksClient::new(
            Arc::clone(&backend),
            &config.google_books_url,
            google_key.clone(),
            catalog_timeout,
        )
        .context("google books client")?,
    );
    let google_source: Arc<dyn BookSource> = Arc::new(GoogleBooksSource::new(
        GoogleBooksClient::new(
            Arc::clone(&backend),
            &config.google_books_url,
            google_key,
            catalog_timeout,
        )
        .context("google books client")?,
    ));
    let open_library: Arc<dyn BookSource> = Arc::new(OpenLibrarySource::new(
        OpenLibraryClient::new(Arc::clone(&backend), &config.open_library_url, catalog_timeout)
            .context("open library client")?,
    ));
    let isbndb: Arc<dyn BookSource> = Arc::new(IsbndbSource::new(
        IsbndbClient::new(
            Arc::clone(&backend),
            &config.isbndb_url,
            isbndb_key,
            catalog_timeout,
        )
        .context("isbndb client")?,
    ));

    let engine = Arc::new(Orchestrator::new(
        vec![Arc::clone(&google_source), Arc::clone(&open_library)],
        vec![google_source, open_library, isbndb],
        cache,
        Arc::clone(&metrics),
        config.max_upstream_calls_per_request,
    ));

    // Jobs and pipeline drivers.
    let job_config = JobConfig {
        persist_every_n: config.job_persist_n,
        persist_max_interval: Duration::from_secs(config.job_persist_t_s),
        token_ttl: Duration::from_secs(config.token_ttl_s),
        refresh_window: Duration::from_secs(config.token_refresh_window_s),
        cleanup_after: Duration::from_secs(config.job_cleanup_hours * 3600),
        ready_timeout: Duration::from_secs(5),
    };
    let jobs = Arc::new(JobRegistry::new(
        Arc::new(FsJobStore::new(&config.jobs_dir)),
        job_config.clone(),
    ));
    let results = Arc::new(FsResultStore::new(
        PathBuf::from(&config.object_store_dir).join("results"),
        "/results",
    ));
    let pipeline_config = PipelineConfig {
        retry: RetryPolicy::default(),
        result_spill_bytes: config.result_spill_bytes,
    };

    let vision = Arc::new(
        VisionClient::new(
            Arc::clone(&backend),
            &config.ai_url,
            ai_key.clone(),
            &config.vision_model,
            ai_timeout,
        )
        .context("vision client")?,
    );
    let csv_parser = Arc::new(
        CsvParseClient::new(
            Arc::clone(&backend),
            &config.ai_url,
            ai_key,
            &config.vision_model,
            ai_timeout,
        )
        .context("csv parse client")?,
    );

    let scan = Arc::new(ScanDriver::new(
        vision,
        Arc::clone(&engine),
        Arc::clone(&jobs),
        results.clone(),
        pipeline_config.clone(),
    ));
    let csv = Arc::new(CsvDriver::new(
        csv_parser,
        Arc::clone(&engine),
        Arc::clone(&jobs),
        results.clone(),
        pipeline_config.clone(),
    ));
    let enrich = Arc::new(EnrichmentDriver::new(
        Arc::clone(&engine),
        Arc::new(GoogleVolumeResolver::new(google_client)),
        Arc::clone(&jobs),
        results,
        pipeline_config,
    ));

    let limiter = FailOpenLimiter::new(LimiterRegistry::new(
        config.rate_limit_max,
        config.rate_limit_window_s,
    ));

    let state = Arc::new(AppState {
        engine,
        jobs,
        scan,
        csv,
        enrich,
        limiter,
        metrics,
        aggregator,
        job_config,
    });

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "shelf-daemon listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
    .context("serve")
}

async fn optional_secret(secrets: &dyn SecretSource, name: &str) -> Option<SecretString> {
    match secrets.get(name).await {
        Ok(secret) => Some(secret),
        Err(err) => {
            info!(secret = name, reason = %err, "secret not configured, provider will degrade");
            None
        }
    }
}
