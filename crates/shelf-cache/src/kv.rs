// SPDX-License-Identifier: MIT OR Apache-2.0
//! The key-value (warm) tier backed by Redis.

use crate::tier::{CacheEntry, CacheTier, TierError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Redis-backed warm tier. TTLs follow the endpoint policy.
pub struct KvTier {
    conn: ConnectionManager,
}

impl KvTier {
    /// Connect to Redis at `url` with an auto-reconnecting manager.
    ///
    /// # Errors
    ///
    /// Returns a [`TierError::Backend`] when the URL is invalid or the
    /// initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, TierError> {
        let client = redis::Client::open(url).map_err(|e| TierError::Backend {
            tier: "kv",
            reason: e.to_string(),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| TierError::Backend {
                tier: "kv",
                reason: e.to_string(),
            })?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheTier for KvTier {
    fn name(&self) -> &'static str {
        "kv"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| TierError::Backend {
            tier: "kv",
            reason: e.to_string(),
        })?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| TierError::Decode {
                    tier: "kv",
                    reason: e.to_string(),
                }),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), TierError> {
        let json = serde_json::to_string(entry).map_err(|e| TierError::Decode {
            tier: "kv",
            reason: e.to_string(),
        })?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await
            .map_err(|e| TierError::Backend {
                tier: "kv",
                reason: e.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| TierError::Backend {
            tier: "kv",
            reason: e.to_string(),
        })
    }
}
