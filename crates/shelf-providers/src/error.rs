// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured provider errors.

use shelf_core::ProviderId;

/// Classification of a provider failure. Drives the orchestrator's
/// fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The per-call deadline elapsed.
    Timeout,
    /// The provider answered with a 5xx.
    Unavailable,
    /// The provider answered with a 429.
    RateLimited,
    /// The provider answered with a 404.
    NotFound,
    /// The response body failed schema or JSON decoding.
    InvalidResponse,
    /// A required secret is missing or empty.
    AuthMissing,
    /// Connection-level failure (DNS, TLS, reset, ...).
    Transport,
}

impl ErrorKind {
    /// True for failures that a pipeline driver may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable)
    }
}

/// A failure from one provider call.
///
/// The message never carries the provider's response body or any secret
/// material.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} {operation}: {message}")]
pub struct ProviderError {
    /// Which provider failed.
    pub provider: ProviderId,
    /// The operation that failed (`search_title`, `scan_image`, ...).
    pub operation: &'static str,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail, body-free.
    pub message: String,
    /// Upstream-supplied `Retry-After`, seconds, when rate limited.
    pub retry_after_s: Option<u64>,
}

impl ProviderError {
    /// Build an error for `provider`/`operation`.
    pub fn new(
        provider: ProviderId,
        operation: &'static str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            operation,
            kind,
            message: message.into(),
            retry_after_s: None,
        }
    }

    /// Classify an HTTP status into an error, or `None` for success.
    pub fn from_status(
        provider: ProviderId,
        operation: &'static str,
        status: u16,
        retry_after_s: Option<u64>,
    ) -> Option<Self> {
        let kind = match status {
            200..=299 => return None,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Unavailable,
            _ => ErrorKind::InvalidResponse,
        };
        Some(Self {
            provider,
            operation,
            kind,
            message: format!("upstream returned status {status}"),
            retry_after_s: if kind == ErrorKind::RateLimited {
                retry_after_s
            } else {
                None
            },
        })
    }
}
