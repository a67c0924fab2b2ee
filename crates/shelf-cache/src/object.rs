// SPDX-License-Identifier: MIT OR Apache-2.0
//! The object-store (cold) tier backed by the filesystem.
//!
//! Values live as JSON objects; lookups go through a `cold-index:<key>`
//! entry that points at the object and carries expiry. Rehydration into
//! warmer tiers is the composite's job and happens lazily, one key per
//! read, never as a bulk write burst.

use crate::key::CacheKey;
use crate::tier::{CacheEntry, CacheTier, TierError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Cold-index record pointing at an object file.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    object: String,
    stored_at_ms: i64,
    value_ttl_s: u64,
}

/// Filesystem-backed cold tier.
pub struct ObjectTier {
    root: PathBuf,
    index_ttl: Duration,
}

impl ObjectTier {
    /// A cold tier rooted at `root`, with `index_ttl` bounding index
    /// entry lifetime regardless of the value TTL.
    pub fn new(root: impl Into<PathBuf>, index_ttl: Duration) -> Self {
        Self {
            root: root.into(),
            index_ttl,
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(format!("{}.json", fnv64(key)))
    }

    fn index_path(&self, key: &str) -> PathBuf {
        let index_key = CacheKey::cold_index(key);
        self.root.join("cold-index").join(format!("{}.json", fnv64(&index_key)))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, TierError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TierError::Decode {
                    tier: "object",
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TierError::Backend {
                tier: "object",
                reason: e.to_string(),
            }),
        }
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TierError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| TierError::Backend {
                tier: "object",
                reason: e.to_string(),
            })?;
        }
        let bytes = serde_json::to_vec(value).map_err(|e| TierError::Decode {
            tier: "object",
            reason: e.to_string(),
        })?;
        fs::write(path, bytes).await.map_err(|e| TierError::Backend {
            tier: "object",
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CacheTier for ObjectTier {
    fn name(&self) -> &'static str {
        "object"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierError> {
        let index_path = self.index_path(key);
        let Some(record) = Self::read_json::<IndexRecord>(&index_path).await? else {
            return Ok(None);
        };

        let lifetime_s = record.value_ttl_s.min(self.index_ttl.as_secs());
        let expires_at = record.stored_at_ms + (lifetime_s as i64) * 1000;
        if Utc::now().timestamp_millis() >= expires_at {
            // Expired: drop both files, best effort.
            let _ = fs::remove_file(&index_path).await;
            let _ = fs::remove_file(self.root.join("objects").join(&record.object)).await;
            return Ok(None);
        }

        Self::read_json::<CacheEntry>(&self.root.join("objects").join(&record.object)).await
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), TierError> {
        let object_path = self.object_path(key);
        Self::write_json(&object_path, entry).await?;

        let object_name = object_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let record = IndexRecord {
            object: object_name,
            stored_at_ms: Utc::now().timestamp_millis(),
            value_ttl_s: ttl.as_secs(),
        };
        Self::write_json(&self.index_path(key), &record).await
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        let _ = fs::remove_file(self.object_path(key)).await;
        let _ = fs::remove_file(self.index_path(key)).await;
        Ok(())
    }
}

/// FNV-1a over the key, rendered as fixed-width hex. Filesystem-safe and
/// deterministic; keys themselves contain spaces and separators.
fn fnv64(input: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}
