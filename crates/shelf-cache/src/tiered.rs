// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tier composition: read-through, write-through, lazy rehydration.

use crate::key::CacheKey;
use crate::tier::{CacheEntry, CacheTier};
use shelf_telemetry::{CacheOutcome, MetricEvent, MetricsSink};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

// ---------------------------------------------------------------------------
// TtlPolicy
// ---------------------------------------------------------------------------

/// Per-endpoint TTLs for the warm and cold tiers.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    /// Title and advanced search TTL.
    pub title: Duration,
    /// ISBN lookup TTL.
    pub isbn: Duration,
    /// Author search TTL.
    pub author: Duration,
    /// Cover metadata TTL.
    pub cover: Duration,
}

impl TtlPolicy {
    /// The TTL for a key's endpoint.
    pub fn ttl_for(&self, endpoint: &str) -> Duration {
        match endpoint {
            "search:isbn" | "book:isbn" => self.isbn,
            "search:author" => self.author,
            "cover" => self.cover,
            // title, advanced, and anything new default to the short TTL.
            _ => self.title,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            title: Duration::from_secs(6 * 3600),
            isbn: Duration::from_secs(365 * 24 * 3600),
            author: Duration::from_secs(6 * 3600),
            cover: Duration::from_secs(365 * 24 * 3600),
        }
    }
}

// ---------------------------------------------------------------------------
// TieredCache
// ---------------------------------------------------------------------------

/// Result of a tiered read.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// The entry, if any tier had it.
    pub entry: Option<CacheEntry>,
    /// Which tier decided the outcome (`None` on a full miss).
    pub tier: Option<&'static str>,
}

impl CacheLookup {
    /// True when any tier produced the entry.
    pub fn is_hit(&self) -> bool {
        self.entry.is_some()
    }
}

/// Tiers composed hot-to-cold with the read/write policy.
pub struct TieredCache {
    tiers: Vec<Arc<dyn CacheTier>>,
    policy: TtlPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl TieredCache {
    /// Compose `tiers` (ordered hot → cold) under `policy`.
    ///
    /// Metric emission goes through `metrics`, which is expected to be a
    /// sampled, non-blocking sink; one event per logical operation.
    pub fn new(
        tiers: Vec<Arc<dyn CacheTier>>,
        policy: TtlPolicy,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            tiers,
            policy,
            metrics,
        }
    }

    /// Read through the tiers in order.
    ///
    /// A hit in a colder tier rehydrates every warmer tier for this one
    /// key before returning. Tier failures are logged and skipped.
    pub async fn get(&self, key: &str) -> CacheLookup {
        let endpoint = CacheKey::endpoint_of(key).to_string();
        let start = Instant::now();

        for (depth, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await {
                Ok(Some(entry)) => {
                    self.rehydrate(key, &entry, depth).await;
                    self.metrics.record(MetricEvent::Cache {
                        endpoint,
                        tier: tier.name().to_string(),
                        outcome: CacheOutcome::Hit,
                        latency_ms: start.elapsed().as_millis() as u64,
                    });
                    return CacheLookup {
                        entry: Some(entry),
                        tier: Some(tier.name()),
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key, tier = tier.name(), error = %err, "cache tier read failed");
                }
            }
        }

        self.metrics.record(MetricEvent::Cache {
            endpoint,
            tier: "none".to_string(),
            outcome: CacheOutcome::Miss,
            latency_ms: start.elapsed().as_millis() as u64,
        });
        CacheLookup {
            entry: None,
            tier: None,
        }
    }

    /// Write `entry` to every tier in parallel with the endpoint TTL.
    pub async fn set(&self, key: &str, entry: &CacheEntry) {
        let endpoint = CacheKey::endpoint_of(key).to_string();
        let ttl = self.policy.ttl_for(&endpoint);
        let start = Instant::now();

        let writes = self.tiers.iter().map(|tier| {
            let tier = Arc::clone(tier);
            async move {
                if let Err(err) = tier.set(key, entry, ttl).await {
                    warn!(key, tier = tier.name(), error = %err, "cache tier write failed");
                }
            }
        });
        futures::future::join_all(writes).await;

        self.metrics.record(MetricEvent::Cache {
            endpoint,
            tier: "all".to_string(),
            outcome: CacheOutcome::Set,
            latency_ms: start.elapsed().as_millis() as u64,
        });
    }

    /// Remove `key` from every tier.
    pub async fn delete(&self, key: &str) {
        for tier in &self.tiers {
            if let Err(err) = tier.delete(key).await {
                warn!(key, tier = tier.name(), error = %err, "cache tier delete failed");
            }
        }
    }

    /// Copy a cold hit into the warmer tiers, one key at a time.
    async fn rehydrate(&self, key: &str, entry: &CacheEntry, found_at: usize) {
        let endpoint = CacheKey::endpoint_of(key);
        let ttl = self.policy.ttl_for(endpoint);
        for tier in &self.tiers[..found_at] {
            if let Err(err) = tier.set(key, entry, ttl).await {
                warn!(key, tier = tier.name(), error = %err, "cache rehydration failed");
            }
        }
    }
}
