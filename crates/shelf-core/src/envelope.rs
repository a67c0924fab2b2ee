// SPDX-License-Identifier: MIT OR Apache-2.0
//! The unified HTTP response envelope.
//!
//! Success is `{ "data": ..., "metadata": ... }`, failure is
//! `{ "error": { "code", "message", "statusCode" } }`. There is no
//! `success` boolean; presence of `error` denotes failure, and the enum
//! makes it impossible to produce both shapes at once.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to every successful response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Where the payload came from: a provider id, `"cache"`, or an
    /// internal source tag.
    pub source: String,
    /// True when the payload was served from the cache.
    pub cached: bool,
    /// ISO-8601 timestamp of when the response was produced.
    pub timestamp: String,
    /// Endpoint-specific extras (result counts, degraded providers, ...).
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResponseMetadata {
    /// Metadata stamped with the current time.
    pub fn now(source: impl Into<String>, cached: bool) -> Self {
        Self {
            source: source.into(),
            cached,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            extra: BTreeMap::new(),
        }
    }

    /// Attach an endpoint-specific extra field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// The error body of a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable machine-readable code (`INVALID_ISBN`, `NOT_FOUND`, ...).
    pub code: String,
    /// Human-readable, non-localized message. Never contains provider
    /// bodies, tokens, keys, or stack traces.
    pub message: String,
    /// HTTP status the error was served with.
    pub status_code: u16,
}

/// The unified response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiEnvelope<T> {
    /// Successful response: payload plus metadata.
    Success {
        /// The endpoint-specific payload.
        data: T,
        /// Response metadata.
        metadata: ResponseMetadata,
    },
    /// Failed response: a single error body.
    Failure {
        /// The error body.
        error: ErrorBody,
    },
}

impl<T> ApiEnvelope<T> {
    /// Build a success envelope.
    pub fn success(data: T, metadata: ResponseMetadata) -> Self {
        Self::Success { data, metadata }
    }

    /// Build a failure envelope.
    pub fn failure(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self::Failure {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                status_code: status,
            },
        }
    }

    /// The HTTP status this envelope should be served with (200 for
    /// success).
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failure { error } => error.status_code,
        }
    }
}
