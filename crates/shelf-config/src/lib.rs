// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and secret sources for Shelfstack.
//!
//! [`ServiceConfig`] is read once at startup from an optional TOML file
//! plus environment overrides, then treated as immutable. Validation
//! produces advisory [`ConfigWarning`]s for suspicious-but-workable values
//! and hard [`ConfigError`]s for unusable ones.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod secrets;

pub use secrets::{EnvSecrets, SecretError, SecretSource, SecretString, VaultSecrets};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// A sampling rate outside `[0, 1]` was clamped.
    SamplingRateClamped {
        /// Endpoint the rate was configured for.
        endpoint: String,
        /// Value as configured.
        configured: f64,
    },
    /// A TTL of zero disables a cache tier for that endpoint.
    ZeroTtl {
        /// Which knob carries the zero.
        field: String,
    },
    /// A provider timeout is unusually large.
    LargeTimeout {
        /// Which knob carries the value.
        field: String,
        /// Timeout value in milliseconds.
        ms: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::SamplingRateClamped { endpoint, configured } => {
                write!(f, "sampling rate {configured} for '{endpoint}' clamped to [0, 1]")
            }
            ConfigWarning::ZeroTtl { field } => write!(f, "'{field}' is zero; tier disabled"),
            ConfigWarning::LargeTimeout { field, ms } => {
                write!(f, "'{field}' is unusually large ({ms} ms)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Edge (in-process) cache TTL, seconds.
    pub edge_ttl_s: u64,
    /// Warm-tier TTL for title searches, seconds.
    pub kv_ttl_title_s: u64,
    /// Warm-tier TTL for ISBN lookups, seconds.
    pub kv_ttl_isbn_s: u64,
    /// Warm-tier TTL for author searches, seconds.
    pub kv_ttl_author_s: u64,
    /// Warm-tier TTL for cover metadata, seconds.
    pub kv_ttl_cover_s: u64,
    /// Cold-index entry TTL, seconds.
    pub cold_index_ttl_s: u64,

    /// Per-call deadline for catalog providers, milliseconds.
    pub provider_timeout_ms: u64,
    /// Per-call deadline for AI providers, milliseconds.
    pub ai_timeout_ms: u64,
    /// Per-call deadline for image downloads, milliseconds.
    pub image_timeout_ms: u64,

    /// Requests allowed per client per window.
    pub rate_limit_max: u32,
    /// Rate-limit window, seconds.
    pub rate_limit_window_s: u64,

    /// Persist job state after this many coalesced updates.
    pub job_persist_n: u32,
    /// Persist job state after this many seconds without a write.
    pub job_persist_t_s: u64,
    /// Hours after a terminal status before job state is deleted.
    pub job_cleanup_hours: u64,

    /// Auth token lifetime, seconds.
    pub token_ttl_s: u64,
    /// Refresh allowed within this many seconds of expiry.
    pub token_refresh_window_s: u64,

    /// Hard cap on upstream calls within one logical request.
    pub max_upstream_calls_per_request: u32,

    /// Job results larger than this many bytes spill to the object store.
    pub result_spill_bytes: usize,

    /// Per-endpoint analytics sampling rates in `[0, 1]`.
    pub analytics_sampling: BTreeMap<String, f64>,

    /// Google Books API base URL.
    pub google_books_url: String,
    /// Open Library API base URL.
    pub open_library_url: String,
    /// ISBNdb API base URL.
    pub isbndb_url: String,
    /// AI provider base URL.
    pub ai_url: String,
    /// AI vision model identifier; deployment picks the concrete variant.
    pub vision_model: String,

    /// Redis connection URL for the warm tier; `None` disables the tier.
    pub redis_url: Option<String>,
    /// Directory backing the cold object-store tier.
    pub object_store_dir: String,
    /// Directory backing durable job state.
    pub jobs_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut sampling = BTreeMap::new();
        sampling.insert("/v1/search/title".to_string(), 0.1);
        sampling.insert("/v1/search/isbn".to_string(), 0.25);
        sampling.insert("/api/enrichment/start".to_string(), 0.5);

        Self {
            edge_ttl_s: 60,
            kv_ttl_title_s: 6 * 3600,
            kv_ttl_isbn_s: 365 * 24 * 3600,
            kv_ttl_author_s: 6 * 3600,
            kv_ttl_cover_s: 365 * 24 * 3600,
            cold_index_ttl_s: 90 * 24 * 3600,
            provider_timeout_ms: 5_000,
            ai_timeout_ms: 30_000,
            image_timeout_ms: 10_000,
            rate_limit_max: 10,
            rate_limit_window_s: 60,
            job_persist_n: 20,
            job_persist_t_s: 30,
            job_cleanup_hours: 24,
            token_ttl_s: 7_200,
            token_refresh_window_s: 1_800,
            max_upstream_calls_per_request: 50,
            result_spill_bytes: 256 * 1024,
            analytics_sampling: sampling,
            google_books_url: "https://www.googleapis.com/books/v1".to_string(),
            open_library_url: "https://openlibrary.org".to_string(),
            isbndb_url: "https://api2.isbndb.com".to_string(),
            ai_url: "https://generativelanguage.googleapis.com".to_string(),
            vision_model: "gemini-2.0-flash".to_string(),
            redis_url: None,
            object_store_dir: ".shelfstack/objects".to_string(),
            jobs_dir: ".shelfstack/jobs".to_string(),
        }
    }
}

/// Parse a TOML string into a [`ServiceConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] when the document is not valid TOML
/// or contains unknown fields.
pub fn parse_toml(input: &str) -> Result<ServiceConfig, ConfigError> {
    toml::from_str(input).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Load configuration from an optional file, then apply environment
/// overrides, then validate.
///
/// # Errors
///
/// Returns an error if the file is missing/unparseable or validation
/// fails.
pub fn load_config(path: Option<&Path>) -> Result<(ServiceConfig, Vec<ConfigWarning>), ConfigError> {
    let mut config = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&raw)?
        }
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config);
    let warnings = validate_config(&mut config)?;
    Ok((config, warnings))
}

fn apply_env_overrides(config: &mut ServiceConfig) {
    fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok()?.parse().ok()
    }

    if let Some(v) = parse_env("SHELF_RATE_LIMIT_MAX") {
        config.rate_limit_max = v;
    }
    if let Some(v) = parse_env("SHELF_RATE_LIMIT_WINDOW_S") {
        config.rate_limit_window_s = v;
    }
    if let Some(v) = parse_env("SHELF_PROVIDER_TIMEOUT_MS") {
        config.provider_timeout_ms = v;
    }
    if let Some(v) = parse_env("SHELF_AI_TIMEOUT_MS") {
        config.ai_timeout_ms = v;
    }
    if let Some(v) = parse_env("SHELF_EDGE_TTL_S") {
        config.edge_ttl_s = v;
    }
    if let Ok(v) = std::env::var("SHELF_REDIS_URL") {
        if !v.is_empty() {
            config.redis_url = Some(v);
        }
    }
    if let Ok(v) = std::env::var("SHELF_OBJECT_STORE_DIR") {
        if !v.is_empty() {
            config.object_store_dir = v;
        }
    }
    if let Ok(v) = std::env::var("SHELF_JOBS_DIR") {
        if !v.is_empty() {
            config.jobs_dir = v;
        }
    }
}

/// Semantic validation. Clamps out-of-range sampling rates in place and
/// returns advisory warnings; hard failures become
/// [`ConfigError::ValidationError`].
pub fn validate_config(config: &mut ServiceConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    if config.rate_limit_max == 0 {
        reasons.push("rate_limit_max must be at least 1".to_string());
    }
    if config.rate_limit_window_s == 0 {
        reasons.push("rate_limit_window_s must be at least 1".to_string());
    }
    if config.max_upstream_calls_per_request == 0 {
        reasons.push("max_upstream_calls_per_request must be at least 1".to_string());
    }
    if config.token_refresh_window_s > config.token_ttl_s {
        reasons.push("token_refresh_window_s must not exceed token_ttl_s".to_string());
    }
    if config.job_persist_n == 0 {
        reasons.push("job_persist_n must be at least 1".to_string());
    }

    for (field, value) in [
        ("edge_ttl_s", config.edge_ttl_s),
        ("kv_ttl_title_s", config.kv_ttl_title_s),
        ("kv_ttl_isbn_s", config.kv_ttl_isbn_s),
        ("kv_ttl_author_s", config.kv_ttl_author_s),
        ("kv_ttl_cover_s", config.kv_ttl_cover_s),
    ] {
        if value == 0 {
            warnings.push(ConfigWarning::ZeroTtl {
                field: field.to_string(),
            });
        }
    }

    for (field, ms) in [
        ("provider_timeout_ms", config.provider_timeout_ms),
        ("ai_timeout_ms", config.ai_timeout_ms),
        ("image_timeout_ms", config.image_timeout_ms),
    ] {
        if ms > 120_000 {
            warnings.push(ConfigWarning::LargeTimeout {
                field: field.to_string(),
                ms,
            });
        }
    }

    for (endpoint, rate) in config.analytics_sampling.iter_mut() {
        if !(0.0..=1.0).contains(rate) {
            warnings.push(ConfigWarning::SamplingRateClamped {
                endpoint: endpoint.clone(),
                configured: *rate,
            });
            *rate = rate.clamp(0.0, 1.0);
        }
    }

    if reasons.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}
