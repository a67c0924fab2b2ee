// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-client fixed-window rate limiting.
//!
//! Each client key owns a [`ClientLimiter`] entity whose mutations are
//! serialized behind a mutex; the entity is the sole thing that prevents
//! check/increment races between concurrent callers for one client.
//! Limiter failure fails open: a broken limiter must not take the API
//! down.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Persistent window state for one client.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    /// Epoch-ms start of the current window.
    pub window_start: i64,
    /// Requests counted inside the current window.
    pub count: u32,
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Configured per-window maximum.
    pub limit: u32,
    /// Epoch-ms instant the window resets.
    pub reset_at: i64,
    /// Whole seconds until reset; present only when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
}

/// Errors from a limiter backend.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The limiter's backing entity could not be reached.
    #[error("rate limiter unavailable: {reason}")]
    Unavailable {
        /// Human-readable detail.
        reason: String,
    },
}

/// The limiter seam: per-client check-and-increment plus read-only status.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Atomically check the window and count this request.
    async fn check_and_increment(&self, client: &str) -> Result<RateDecision, LimiterError>;

    /// Read the current window without counting a request.
    async fn status(&self, client: &str) -> Result<RateDecision, LimiterError>;
}

// ---------------------------------------------------------------------------
// ClientLimiter
// ---------------------------------------------------------------------------

/// The per-client entity. All mutations go through one mutex, so
/// concurrent callers for the same client serialize.
#[derive(Debug)]
pub struct ClientLimiter {
    state: Mutex<RateLimitCounter>,
    max: u32,
    window_ms: i64,
}

impl ClientLimiter {
    /// A fresh entity allowing `max` requests per `window_s` seconds.
    pub fn new(max: u32, window_s: u64) -> Self {
        Self {
            state: Mutex::new(RateLimitCounter::default()),
            max,
            window_ms: (window_s as i64) * 1000,
        }
    }

    /// Atomically apply the fixed-window check.
    pub async fn check_and_increment(&self) -> RateDecision {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().await;

        if now - state.window_start >= self.window_ms {
            state.window_start = now;
            state.count = 0;
        }
        let reset_at = state.window_start + self.window_ms;

        if state.count < self.max {
            state.count += 1;
            RateDecision {
                allowed: true,
                remaining: self.max - state.count,
                limit: self.max,
                reset_at,
                retry_after_s: None,
            }
        } else {
            RateDecision {
                allowed: false,
                remaining: 0,
                limit: self.max,
                reset_at,
                retry_after_s: Some(((reset_at - now).max(0) as u64).div_ceil(1000).max(1)),
            }
        }
    }

    /// Read the current window without counting.
    pub async fn status(&self) -> RateDecision {
        let now = Utc::now().timestamp_millis();
        let state = self.state.lock().await;
        let expired = now - state.window_start >= self.window_ms;
        let count = if expired { 0 } else { state.count };
        let reset_at = if expired {
            now + self.window_ms
        } else {
            state.window_start + self.window_ms
        };
        RateDecision {
            allowed: count < self.max,
            remaining: self.max.saturating_sub(count),
            limit: self.max,
            reset_at,
            retry_after_s: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LimiterRegistry
// ---------------------------------------------------------------------------

/// Addresses one [`ClientLimiter`] per client key, spawning on demand.
pub struct LimiterRegistry {
    clients: DashMap<String, Arc<ClientLimiter>>,
    max: u32,
    window_s: u64,
}

impl LimiterRegistry {
    /// A registry handing out entities with the given window settings.
    pub fn new(max: u32, window_s: u64) -> Self {
        Self {
            clients: DashMap::new(),
            max,
            window_s,
        }
    }

    fn entity(&self, client: &str) -> Arc<ClientLimiter> {
        self.clients
            .entry(client.to_string())
            .or_insert_with(|| Arc::new(ClientLimiter::new(self.max, self.window_s)))
            .clone()
    }
}

#[async_trait]
impl RateLimiter for LimiterRegistry {
    async fn check_and_increment(&self, client: &str) -> Result<RateDecision, LimiterError> {
        Ok(self.entity(client).check_and_increment().await)
    }

    async fn status(&self, client: &str) -> Result<RateDecision, LimiterError> {
        Ok(self.entity(client).status().await)
    }
}

// ---------------------------------------------------------------------------
// FailOpenLimiter
// ---------------------------------------------------------------------------

/// Wrapper that converts limiter failure into an allow.
///
/// The limiter is a throttle, not an authorization decision; its downtime
/// must not take the API down.
pub struct FailOpenLimiter<L> {
    inner: L,
}

impl<L: RateLimiter> FailOpenLimiter<L> {
    /// Wrap `inner`.
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    /// Check-and-increment; on limiter failure, log and allow.
    pub async fn check_and_increment(&self, client: &str) -> RateDecision {
        match self.inner.check_and_increment(client).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(client, error = %err, "rate limiter unreachable, failing open");
                RateDecision {
                    allowed: true,
                    remaining: 0,
                    limit: 0,
                    reset_at: Utc::now().timestamp_millis(),
                    retry_after_s: None,
                }
            }
        }
    }
}
