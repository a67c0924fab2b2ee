// SPDX-License-Identifier: MIT OR Apache-2.0
//! Metric sinks: the emission side of telemetry.

use crate::MetricEvent;
use crate::aggregate::MetricsAggregator;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Default channel capacity for [`ChannelSink`].
const DEFAULT_CAPACITY: usize = 1024;

/// Anything that accepts metric events.
///
/// `record` must never block and must never fail the caller; sinks drop
/// events under pressure instead.
pub trait MetricsSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: MetricEvent);
}

/// Sink that discards everything. Useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _event: MetricEvent) {}
}

/// Bounded-channel sink with a dropping policy.
///
/// Events are pushed with `try_send`; when the channel is full the event
/// is dropped and counted. A background task drains the channel into a
/// [`MetricsAggregator`].
pub struct ChannelSink {
    tx: mpsc::Sender<MetricEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink draining into `aggregator`, spawning the drain task
    /// on the current runtime.
    pub fn spawn(aggregator: Arc<MetricsAggregator>) -> Self {
        Self::spawn_with_capacity(aggregator, DEFAULT_CAPACITY)
    }

    /// Like [`ChannelSink::spawn`] with an explicit channel capacity.
    pub fn spawn_with_capacity(aggregator: Arc<MetricsAggregator>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<MetricEvent>(capacity);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                aggregator.ingest(event);
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MetricsSink for ChannelSink {
    fn record(&self, event: MetricEvent) {
        if self.tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                debug!(dropped = total, "metrics channel full, dropping events");
            }
        }
    }
}

/// Sink wrapper that applies per-endpoint sampling before delegating.
pub struct SampledSink<S> {
    inner: S,
    sampler: crate::Sampler,
}

impl<S: MetricsSink> SampledSink<S> {
    /// Wrap `inner` with `sampler`.
    pub fn new(inner: S, sampler: crate::Sampler) -> Self {
        Self { inner, sampler }
    }
}

impl<S: MetricsSink> MetricsSink for SampledSink<S> {
    fn record(&self, event: MetricEvent) {
        if self.sampler.should_sample(event.sampling_key()) {
            self.inner.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheOutcome;

    fn cache_event() -> MetricEvent {
        MetricEvent::Cache {
            endpoint: "search:title".into(),
            tier: "edge".into(),
            outcome: CacheOutcome::Hit,
            latency_ms: 2,
        }
    }

    #[tokio::test]
    async fn events_reach_the_aggregator() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let sink = ChannelSink::spawn(Arc::clone(&aggregator));
        sink.record(cache_event());
        sink.record(cache_event());

        // Drain task runs on the same runtime; yield until it catches up.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if aggregator.summary(3600).cache_hits == 2 {
                return;
            }
        }
        panic!("aggregator never saw the events");
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let aggregator = Arc::new(MetricsAggregator::new());
        // Capacity 1 and a stalled drain: everything past the first drops.
        let (tx, _rx_held) = mpsc::channel::<MetricEvent>(1);
        let sink = ChannelSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        drop(aggregator);

        sink.record(cache_event());
        sink.record(cache_event());
        sink.record(cache_event());
        assert_eq!(sink.dropped(), 2);
    }
}
