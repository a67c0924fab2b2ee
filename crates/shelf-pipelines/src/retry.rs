// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-item retry with fixed backoff.
//!
//! Drivers retry individual units, never whole jobs, and only for
//! failures where a retry can help. Rate limiting is not retried: the
//! provider is skipped for the rest of the job.

use std::future::Future;
use std::time::Duration;

/// Fixed-backoff retry policy for one item.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: crate::default_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails unretryably per
    /// `should_retry`, or the attempt budget is spent.
    pub async fn run<T, E, F, Fut, P>(&self, should_retry: P, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts.max(1) && should_retry(&err) => {
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
