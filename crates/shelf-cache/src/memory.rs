// SPDX-License-Identifier: MIT OR Apache-2.0
//! A plain in-memory tier with per-entry TTLs.
//!
//! Stands in for the warm tier when Redis is not configured, and doubles
//! as the stub tier in tests across the workspace.

use crate::tier::{CacheEntry, CacheTier, TierError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory tier honoring the per-call TTL.
#[derive(Default)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, (i64, CacheEntry)>>,
}

impl MemoryTier {
    /// An empty tier.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierError> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((expires_at, entry)) if *expires_at > now => Ok(Some(entry.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), TierError> {
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (expires_at, entry.clone()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn honors_per_entry_ttl() {
        let tier = MemoryTier::new();
        let entry = CacheEntry::now(json!(1), "test");
        tier.set("a", &entry, Duration::from_millis(20)).await.unwrap();
        tier.set("b", &entry, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(tier.get("a").await.unwrap().is_none());
        assert!(tier.get("b").await.unwrap().is_some());
    }
}
