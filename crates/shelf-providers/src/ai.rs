// SPDX-License-Identifier: MIT OR Apache-2.0
//! AI providers: bookshelf image scanning and CSV parsing.
//!
//! Both speak the `generateContent` protocol with JSON output enforced
//! via `response_mime_type`; the concrete model is configuration, so
//! deployments choose the variant without code changes. Callers depend
//! on the [`VisionProvider`] / [`CsvParser`] traits and stub them in
//! tests.

use crate::error::{ErrorKind, ProviderError};
use crate::http::{HttpBackend, transport_error};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shelf_config::SecretString;
use shelf_core::ProviderId;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const SCAN_PROMPT: &str = "Identify every book visible in this shelf photo. \
Respond with a JSON array of objects, one per book, each with keys \
\"title\" (string), \"author\" (string or null), and \"isbn\" (string or null). \
Only include books whose spines or covers are legible.";

const CSV_PROMPT: &str = "Parse the following CSV of books into a JSON array of \
objects with keys \"title\" (string), \"author\" (string or null), and \
\"isbn\" (string or null). Infer the column mapping from the header row; \
skip rows without a usable title.\n\nCSV:\n";

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Token accounting reported by the AI provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens produced.
    pub completion_tokens: u64,
}

/// One book the vision model detected on a shelf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedBook {
    /// Title as read off the spine or cover.
    pub title: String,
    /// Author, when legible.
    #[serde(default)]
    pub author: Option<String>,
    /// ISBN, when printed and legible.
    #[serde(default)]
    pub isbn: Option<String>,
}

/// Result of one image scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Detected books in reading order.
    pub books: Vec<DetectedBook>,
    /// Token accounting for the call.
    pub usage: TokenUsage,
    /// Model identifier that produced the result.
    pub model: String,
}

/// One parsed CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvBookRecord {
    /// Title.
    pub title: String,
    /// Author, when the CSV had one.
    #[serde(default)]
    pub author: Option<String>,
    /// ISBN, when the CSV had one.
    #[serde(default)]
    pub isbn: Option<String>,
}

/// Result of one CSV parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvParseResult {
    /// Parsed records in row order.
    pub records: Vec<CsvBookRecord>,
    /// Token accounting for the call.
    pub usage: TokenUsage,
    /// Model identifier that produced the result.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The image-scanning seam used by the AI-scan pipeline.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Detect books in one image.
    async fn scan_image(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<ScanResult, ProviderError>;
}

/// The CSV-parsing seam used by the import pipeline.
#[async_trait]
pub trait CsvParser: Send + Sync {
    /// Parse CSV text into normalized book records.
    async fn parse_csv(&self, text: &str) -> Result<CsvParseResult, ProviderError>;
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    usage_metadata: UsageMetadata,
    model_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: u64,
}

// ---------------------------------------------------------------------------
// Shared call plumbing
// ---------------------------------------------------------------------------

struct AiEndpoint {
    http: Arc<dyn HttpBackend>,
    base: Url,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
}

impl AiEndpoint {
    fn new(
        http: Arc<dyn HttpBackend>,
        base: &str,
        api_key: Option<SecretString>,
        model: &str,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<Self, ProviderError> {
        let base = Url::parse(base).map_err(|e| {
            ProviderError::new(ProviderId::AiVision, operation, ErrorKind::InvalidResponse, e.to_string())
        })?;
        Ok(Self {
            http,
            base,
            api_key,
            model: model.to_string(),
            timeout,
        })
    }

    /// Run `generateContent` and return the model's JSON output text
    /// parsed into `T`, together with usage and the model string.
    async fn generate_json<T: serde::de::DeserializeOwned>(
        &self,
        provider: ProviderId,
        operation: &'static str,
        parts: serde_json::Value,
    ) -> Result<(T, TokenUsage, String), ProviderError> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::new(
                provider,
                operation,
                ErrorKind::AuthMissing,
                "AI API key is not configured",
            )
        })?;

        let mut url = self
            .base
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|e| {
                ProviderError::new(provider, operation, ErrorKind::InvalidResponse, e.to_string())
            })?;
        url.query_pairs_mut().append_pair("key", key.expose());

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "response_mime_type": "application/json" },
        });

        let response = self
            .http
            .post_json(&url, &body, &[], self.timeout)
            .await
            .map_err(|e| transport_error(provider, operation, e))?;
        let decoded: GenerateContentResponse = response.decode(provider, operation)?;

        let text = decoded
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.text.as_deref())
            .ok_or_else(|| {
                ProviderError::new(
                    provider,
                    operation,
                    ErrorKind::InvalidResponse,
                    "response carried no candidate text",
                )
            })?;

        let parsed: T = serde_json::from_str(text).map_err(|e| {
            ProviderError::new(
                provider,
                operation,
                ErrorKind::InvalidResponse,
                format!("candidate text was not the expected JSON: {e}"),
            )
        })?;

        let usage = TokenUsage {
            prompt_tokens: decoded.usage_metadata.prompt_token_count,
            completion_tokens: decoded.usage_metadata.candidates_token_count,
        };
        let model = decoded.model_version.unwrap_or_else(|| self.model.clone());
        Ok((parsed, usage, model))
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// Production vision client.
pub struct VisionClient {
    endpoint: AiEndpoint,
}

impl VisionClient {
    /// Build a vision client.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidResponse`] when `base` is not a valid URL.
    pub fn new(
        http: Arc<dyn HttpBackend>,
        base: &str,
        api_key: Option<SecretString>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: AiEndpoint::new(http, base, api_key, model, timeout, "scan_image")?,
        })
    }
}

#[async_trait]
impl VisionProvider for VisionClient {
    async fn scan_image(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<ScanResult, ProviderError> {
        let parts = json!([
            { "text": SCAN_PROMPT },
            { "inline_data": { "mime_type": content_type, "data": BASE64.encode(image) } },
        ]);
        let (books, usage, model) = self
            .endpoint
            .generate_json::<Vec<DetectedBook>>(ProviderId::AiVision, "scan_image", parts)
            .await?;
        Ok(ScanResult {
            books,
            usage,
            model,
        })
    }
}

/// Production CSV-parsing client.
pub struct CsvParseClient {
    endpoint: AiEndpoint,
}

impl CsvParseClient {
    /// Build a CSV-parsing client.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidResponse`] when `base` is not a valid URL.
    pub fn new(
        http: Arc<dyn HttpBackend>,
        base: &str,
        api_key: Option<SecretString>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: AiEndpoint::new(http, base, api_key, model, timeout, "parse_csv")?,
        })
    }
}

#[async_trait]
impl CsvParser for CsvParseClient {
    async fn parse_csv(&self, text: &str) -> Result<CsvParseResult, ProviderError> {
        let parts = json!([{ "text": format!("{CSV_PROMPT}{text}") }]);
        let (records, usage, model) = self
            .endpoint
            .generate_json::<Vec<CsvBookRecord>>(ProviderId::AiCsv, "parse_csv", parts)
            .await?;
        Ok(CsvParseResult {
            records,
            usage,
            model,
        })
    }
}
