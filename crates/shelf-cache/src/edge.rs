// SPDX-License-Identifier: MIT OR Apache-2.0
//! The in-process edge (hot) tier.

use crate::tier::{CacheEntry, CacheTier, TierError};
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// Moka-backed hot tier with a single short ambient TTL.
///
/// The per-call `ttl` argument is ignored: edge freshness is bounded by
/// the configured edge TTL, not the endpoint policy.
pub struct EdgeTier {
    cache: Cache<String, CacheEntry>,
}

impl EdgeTier {
    /// Build an edge tier holding up to `capacity` entries for `ttl`.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl CacheTier for EdgeTier {
    fn name(&self) -> &'static str {
        "edge"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierError> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, entry: &CacheEntry, _ttl: Duration) -> Result<(), TierError> {
        self.cache.insert(key.to_string(), entry.clone()).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
