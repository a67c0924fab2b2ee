// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tier abstraction shared by edge, key-value, and object store.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value plus its origin metadata.
///
/// Entries are immutable for their TTL: writers replace them wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The opaque payload (a canonical response envelope body).
    pub value: serde_json::Value,
    /// Provider or source tag that produced the payload.
    pub source: String,
    /// Epoch-ms timestamp of when the entry was stored.
    pub stored_at_ms: i64,
}

impl CacheEntry {
    /// An entry stamped with the current time.
    pub fn now(value: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            value,
            source: source.into(),
            stored_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Errors from a single tier. Tier errors are absorbed by the composite:
/// logged, never surfaced to the request.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// The tier's backing store rejected or failed the operation.
    #[error("{tier} tier backend error: {reason}")]
    Backend {
        /// Tier name.
        tier: &'static str,
        /// Human-readable detail.
        reason: String,
    },

    /// The stored bytes did not decode as a [`CacheEntry`].
    #[error("{tier} tier decode error: {reason}")]
    Decode {
        /// Tier name.
        tier: &'static str,
        /// Human-readable detail.
        reason: String,
    },
}

/// One cache tier. Implementations must be independently stub-able.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short tier name for logs and metrics (`"edge"`, `"kv"`, `"object"`).
    fn name(&self) -> &'static str;

    /// Look up a key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierError>;

    /// Store an entry under `key` for `ttl`. Tiers with a fixed ambient
    /// TTL (the edge) may ignore `ttl`.
    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), TierError>;

    /// Remove a key. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), TierError>;
}
