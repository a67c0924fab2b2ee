// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for Shelfstack.
//!
//! Every service error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, and arbitrary key-value
//! context. Codes never change across patch releases, so clients can
//! switch on them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use shelf_core::envelope::ErrorBody;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to; determines propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input validation failures; surface immediately with 400.
    Validation,
    /// Authentication / authorization failures.
    Auth,
    /// Resource absent after the full provider chain was consulted.
    NotFound,
    /// Caller exceeded the per-client rate limit.
    RateLimit,
    /// Every upstream provider in a chain failed.
    Upstream,
    /// Job state machine violations.
    State,
    /// Catch-all for unexpected internal errors.
    Internal,
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is part
/// of the public API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// Request shape or parameter is invalid.
    InvalidRequest,
    /// ISBN failed normalization or checksum validation.
    InvalidIsbn,
    /// Job re-initialization with conflicting values.
    ConflictingInit,
    /// Photo index outside the batch's `photos` array.
    InvalidPhotoIndex,

    // -- Auth --
    /// Missing, mismatched, or expired auth token.
    Unauthorized,
    /// Token refresh attempted outside the refresh window.
    RefreshWindowNotOpen,

    // -- Not found --
    /// No provider in the chain had the resource.
    NotFound,

    // -- Rate limit --
    /// Per-client fixed window exhausted.
    RateLimitExceeded,

    // -- Upstream --
    /// Every provider in the chain failed.
    ProviderError,
    /// The per-request upstream call budget was exhausted.
    UpstreamBudgetExceeded,

    // -- State --
    /// Mutation attempted on a terminal job.
    TerminalState,
    /// The job was canceled.
    Canceled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    InternalError,
}

impl ErrorCode {
    /// The broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest
            | Self::InvalidIsbn
            | Self::ConflictingInit
            | Self::InvalidPhotoIndex => ErrorCategory::Validation,

            Self::Unauthorized | Self::RefreshWindowNotOpen => ErrorCategory::Auth,

            Self::NotFound => ErrorCategory::NotFound,

            Self::RateLimitExceeded => ErrorCategory::RateLimit,

            Self::ProviderError | Self::UpstreamBudgetExceeded => ErrorCategory::Upstream,

            Self::TerminalState | Self::Canceled => ErrorCategory::State,

            Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// The HTTP status this code is served with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest
            | Self::InvalidIsbn
            | Self::ConflictingInit
            | Self::InvalidPhotoIndex => 400,
            Self::Unauthorized => 401,
            Self::RefreshWindowNotOpen => 403,
            Self::NotFound => 404,
            Self::TerminalState | Self::Canceled => 409,
            Self::RateLimitExceeded => 429,
            Self::ProviderError => 502,
            Self::UpstreamBudgetExceeded | Self::InternalError => 500,
        }
    }

    /// The stable string form (`"INVALID_ISBN"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidIsbn => "INVALID_ISBN",
            Self::ConflictingInit => "CONFLICTING_INIT",
            Self::InvalidPhotoIndex => "INVALID_PHOTO_INDEX",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RefreshWindowNotOpen => "REFRESH_WINDOW_NOT_OPEN",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::UpstreamBudgetExceeded => "UPSTREAM_BUDGET_EXCEEDED",
            Self::TerminalState => "TERMINAL_STATE",
            Self::Canceled => "CANCELED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ShelfError
// ---------------------------------------------------------------------------

/// A service error: stable code, message, and key-value context.
///
/// Context is for logs only; it is never serialised into response bodies,
/// which keeps provider payloads and secrets out of client-visible errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ShelfError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message; safe for clients.
    pub message: String,
    /// Internal diagnostic context.
    pub context: BTreeMap<String, String>,
}

impl ShelfError {
    /// Build a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach diagnostic context (logs only, never serialised to clients).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The HTTP status this error is served with.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// The client-visible error body (code + message + status only).
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            status_code: self.http_status(),
        }
    }
}

impl fmt::Display for ShelfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ShelfError {}

/// Result alias for fallible service operations.
pub type ShelfResult<T> = Result<T, ShelfError>;
