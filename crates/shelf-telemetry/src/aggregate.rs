// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process metric aggregation for the `/metrics` endpoint.

use crate::{CacheOutcome, MetricEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;

/// Upper bound on retained events; oldest are discarded first.
const MAX_EVENTS: usize = 10_000;

/// Aggregated statistics for one HTTP endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointSummary {
    /// Requests observed.
    pub count: u64,
    /// Responses with status >= 400.
    pub errors: u64,
    /// Responses served from cache.
    pub cached: u64,
    /// Median latency in milliseconds.
    pub p50_latency_ms: f64,
    /// 99th-percentile latency in milliseconds.
    pub p99_latency_ms: f64,
}

/// Aggregated statistics for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderSummary {
    /// Calls observed.
    pub calls: u64,
    /// Failed calls.
    pub failures: u64,
    /// Median latency in milliseconds.
    pub p50_latency_ms: f64,
    /// Mean fallback-chain depth at which this provider was called.
    pub mean_chain_depth: f64,
}

/// Per-tier cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TierSummary {
    /// Hits decided by this tier.
    pub hits: u64,
    /// Misses decided by this tier.
    pub misses: u64,
    /// Writes to this tier.
    pub sets: u64,
}

/// Per-pipeline job counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    /// Jobs started.
    pub started: u64,
    /// Jobs completed.
    pub completed: u64,
    /// Jobs failed.
    pub failed: u64,
    /// Jobs canceled.
    pub canceled: u64,
}

/// Snapshot of everything observed within a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Window the summary covers, in seconds.
    pub period_s: u64,
    /// Per-endpoint request statistics.
    pub requests: BTreeMap<String, EndpointSummary>,
    /// Cache hits across all tiers.
    pub cache_hits: u64,
    /// Cache misses across all tiers.
    pub cache_misses: u64,
    /// Cache writes across all tiers.
    pub cache_sets: u64,
    /// Per-tier cache counters.
    pub cache_by_tier: BTreeMap<String, TierSummary>,
    /// Per-provider call statistics.
    pub providers: BTreeMap<String, ProviderSummary>,
    /// Per-pipeline job counters.
    pub jobs: BTreeMap<String, JobSummary>,
}

/// Collects events and produces windowed summaries.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<VecDeque<(i64, MetricEvent)>>,
}

impl MetricsAggregator {
    /// An empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one event, stamped with the current time.
    pub fn ingest(&self, event: MetricEvent) {
        let now = Utc::now().timestamp_millis();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.push_back((now, event));
        while guard.len() > MAX_EVENTS {
            guard.pop_front();
        }
    }

    /// Summarise events within the trailing `period_s` seconds.
    pub fn summary(&self, period_s: u64) -> MetricsSummary {
        let cutoff = Utc::now().timestamp_millis() - (period_s as i64) * 1000;
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut summary = MetricsSummary {
            period_s,
            ..MetricsSummary::default()
        };
        let mut request_latencies: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut provider_latencies: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut provider_depths: BTreeMap<String, Vec<u32>> = BTreeMap::new();

        for (ts, event) in guard.iter() {
            if *ts < cutoff {
                continue;
            }
            match event {
                MetricEvent::Request {
                    endpoint,
                    status,
                    latency_ms,
                    cached,
                    ..
                } => {
                    let entry = summary.requests.entry(endpoint.clone()).or_default();
                    entry.count += 1;
                    if *status >= 400 {
                        entry.errors += 1;
                    }
                    if *cached {
                        entry.cached += 1;
                    }
                    request_latencies
                        .entry(endpoint.clone())
                        .or_default()
                        .push(*latency_ms);
                }
                MetricEvent::Cache { tier, outcome, .. } => {
                    let entry = summary.cache_by_tier.entry(tier.clone()).or_default();
                    match outcome {
                        CacheOutcome::Hit => {
                            entry.hits += 1;
                            summary.cache_hits += 1;
                        }
                        CacheOutcome::Miss => {
                            entry.misses += 1;
                            summary.cache_misses += 1;
                        }
                        CacheOutcome::Set => {
                            entry.sets += 1;
                            summary.cache_sets += 1;
                        }
                    }
                }
                MetricEvent::Provider {
                    provider,
                    success,
                    latency_ms,
                    chain_depth,
                    ..
                } => {
                    let entry = summary.providers.entry(provider.clone()).or_default();
                    entry.calls += 1;
                    if !success {
                        entry.failures += 1;
                    }
                    provider_latencies
                        .entry(provider.clone())
                        .or_default()
                        .push(*latency_ms);
                    provider_depths
                        .entry(provider.clone())
                        .or_default()
                        .push(*chain_depth);
                }
                MetricEvent::Job { pipeline, phase } => {
                    let entry = summary.jobs.entry(pipeline.clone()).or_default();
                    match phase.as_str() {
                        "started" => entry.started += 1,
                        "completed" => entry.completed += 1,
                        "failed" => entry.failed += 1,
                        "canceled" => entry.canceled += 1,
                        _ => {}
                    }
                }
            }
        }

        for (endpoint, latencies) in request_latencies {
            if let Some(entry) = summary.requests.get_mut(&endpoint) {
                entry.p50_latency_ms = percentile(&latencies, 0.50);
                entry.p99_latency_ms = percentile(&latencies, 0.99);
            }
        }
        for (provider, latencies) in provider_latencies {
            if let Some(entry) = summary.providers.get_mut(&provider) {
                entry.p50_latency_ms = percentile(&latencies, 0.50);
            }
        }
        for (provider, depths) in provider_depths {
            if let Some(entry) = summary.providers.get_mut(&provider) {
                let total: u64 = depths.iter().map(|&d| u64::from(d)).sum();
                entry.mean_chain_depth = total as f64 / depths.len() as f64;
            }
        }

        summary
    }
}

fn percentile(samples: &[u64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

/// Render a summary in the Prometheus text exposition format.
pub fn render_prometheus(summary: &MetricsSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# TYPE shelf_requests_total counter");
    for (endpoint, stats) in &summary.requests {
        let _ = writeln!(
            out,
            "shelf_requests_total{{endpoint=\"{endpoint}\"}} {}",
            stats.count
        );
    }
    let _ = writeln!(out, "# TYPE shelf_request_errors_total counter");
    for (endpoint, stats) in &summary.requests {
        let _ = writeln!(
            out,
            "shelf_request_errors_total{{endpoint=\"{endpoint}\"}} {}",
            stats.errors
        );
    }
    let _ = writeln!(out, "# TYPE shelf_request_latency_ms summary");
    for (endpoint, stats) in &summary.requests {
        let _ = writeln!(
            out,
            "shelf_request_latency_ms{{endpoint=\"{endpoint}\",quantile=\"0.5\"}} {}",
            stats.p50_latency_ms
        );
        let _ = writeln!(
            out,
            "shelf_request_latency_ms{{endpoint=\"{endpoint}\",quantile=\"0.99\"}} {}",
            stats.p99_latency_ms
        );
    }
    let _ = writeln!(out, "# TYPE shelf_cache_operations_total counter");
    for (tier, stats) in &summary.cache_by_tier {
        for (op, value) in [("hit", stats.hits), ("miss", stats.misses), ("set", stats.sets)] {
            let _ = writeln!(
                out,
                "shelf_cache_operations_total{{tier=\"{tier}\",outcome=\"{op}\"}} {value}"
            );
        }
    }
    let _ = writeln!(out, "# TYPE shelf_provider_calls_total counter");
    for (provider, stats) in &summary.providers {
        let _ = writeln!(
            out,
            "shelf_provider_calls_total{{provider=\"{provider}\"}} {}",
            stats.calls
        );
        let _ = writeln!(
            out,
            "shelf_provider_failures_total{{provider=\"{provider}\"}} {}",
            stats.failures
        );
    }
    let _ = writeln!(out, "# TYPE shelf_jobs_total counter");
    for (pipeline, stats) in &summary.jobs {
        for (phase, value) in [
            ("started", stats.started),
            ("completed", stats.completed),
            ("failed", stats.failed),
            ("canceled", stats.canceled),
        ] {
            let _ = writeln!(
                out,
                "shelf_jobs_total{{pipeline=\"{pipeline}\",phase=\"{phase}\"}} {value}"
            );
        }
    }
    out
}
