// SPDX-License-Identifier: MIT OR Apache-2.0
//! Non-blocking, sampled metrics collection for Shelfstack.
//!
//! Everything on the request path goes through a [`MetricsSink`] whose
//! production implementation is a bounded channel with a dropping policy;
//! emission never blocks and never fails a request. High-volume endpoints
//! are sampled before emission.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod anonymize;
pub mod sample;
pub mod sink;

pub use aggregate::{MetricsAggregator, MetricsSummary};
pub use anonymize::anonymize_ip;
pub use sample::Sampler;
pub use sink::{ChannelSink, MetricsSink, NullSink, SampledSink};

use serde::{Deserialize, Serialize};

/// Which way a cache operation went.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Key was present in the tier.
    Hit,
    /// Key was absent.
    Miss,
    /// Value was written.
    Set,
}

/// A single telemetry event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricEvent {
    /// One logical cache operation (emitted once per operation, with the
    /// deciding tier, never per tier inside the write fan-out).
    Cache {
        /// Logical endpoint the key belongs to.
        endpoint: String,
        /// Tier that decided the outcome.
        tier: String,
        /// Hit, miss, or set.
        outcome: CacheOutcome,
        /// Operation latency in milliseconds.
        latency_ms: u64,
    },
    /// One upstream provider call.
    Provider {
        /// Provider id.
        provider: String,
        /// Operation name (`search_title`, `search_isbn`, ...).
        operation: String,
        /// Whether the call succeeded.
        success: bool,
        /// Call latency in milliseconds.
        latency_ms: u64,
        /// Position in the fallback chain, 1-based.
        chain_depth: u32,
    },
    /// One HTTP request.
    Request {
        /// Request path.
        endpoint: String,
        /// Response status code.
        status: u16,
        /// Total latency in milliseconds.
        latency_ms: u64,
        /// Anonymized client IP, if analytics were not skipped.
        client_ip: Option<String>,
        /// Whether the response was served from cache.
        cached: bool,
    },
    /// One job lifecycle transition.
    Job {
        /// Pipeline name.
        pipeline: String,
        /// Phase (`started`, `completed`, `failed`, `canceled`).
        phase: String,
    },
}

impl MetricEvent {
    /// The endpoint-ish key used for sampling decisions.
    pub fn sampling_key(&self) -> &str {
        match self {
            Self::Cache { endpoint, .. } | Self::Request { endpoint, .. } => endpoint,
            Self::Provider { provider, .. } => provider,
            Self::Job { pipeline, .. } => pipeline,
        }
    }
}
