// SPDX-License-Identifier: MIT OR Apache-2.0
//! Open Library search and edition API client. No authentication.

use crate::error::{ErrorKind, ProviderError};
use crate::http::{HttpBackend, transport_error};
use serde::{Deserialize, Serialize};
use shelf_core::ProviderId;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const PROVIDER: ProviderId = ProviderId::OpenLibrary;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// `GET /search.json` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    /// Total matches.
    pub num_found: u32,
    /// Returned work documents.
    pub docs: Vec<SearchDoc>,
}

/// One search document (work-level record).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDoc {
    /// Work key (`/works/OL...W`).
    pub key: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Author display names.
    pub author_name: Option<Vec<String>>,
    /// Year of first publication.
    pub first_publish_year: Option<i32>,
    /// Every ISBN across editions.
    pub isbn: Option<Vec<String>>,
    /// Cover id for `covers.openlibrary.org`.
    pub cover_i: Option<i64>,
    /// Language codes.
    pub language: Option<Vec<String>>,
    /// Subject strings.
    pub subject: Option<Vec<String>>,
    /// Edition keys.
    pub edition_key: Option<Vec<String>>,
    /// Median page count across editions.
    pub number_of_pages_median: Option<u32>,
}

/// `GET /isbn/{isbn}.json` response (edition-level record).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditionPayload {
    /// Edition key (`/books/OL...M`).
    pub key: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Publisher names.
    pub publishers: Option<Vec<String>>,
    /// Free-form publication date.
    pub publish_date: Option<String>,
    /// Page count.
    pub number_of_pages: Option<u32>,
    /// ISBN-10 values.
    pub isbn_10: Option<Vec<String>>,
    /// ISBN-13 values.
    pub isbn_13: Option<Vec<String>>,
    /// Binding string.
    pub physical_format: Option<String>,
    /// Cover ids.
    pub covers: Option<Vec<i64>>,
    /// Language references.
    pub languages: Option<Vec<KeyRef>>,
    /// Work references.
    pub works: Option<Vec<KeyRef>>,
}

/// A `{"key": "/type/..."}` reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRef {
    /// The referenced key.
    pub key: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Open Library client.
pub struct OpenLibraryClient {
    http: Arc<dyn HttpBackend>,
    base: Url,
    timeout: Duration,
}

impl OpenLibraryClient {
    /// Build a client against `base` (e.g. `https://openlibrary.org`).
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidResponse`] when `base` is not a valid URL.
    pub fn new(
        http: Arc<dyn HttpBackend>,
        base: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base = Url::parse(base).map_err(|e| {
            ProviderError::new(PROVIDER, "new", ErrorKind::InvalidResponse, e.to_string())
        })?;
        Ok(Self {
            http,
            base,
            timeout,
        })
    }

    async fn search(
        &self,
        operation: &'static str,
        params: &[(&str, String)],
    ) -> Result<SearchResponse, ProviderError> {
        let mut url = self.base.join("search.json").map_err(|e| {
            ProviderError::new(PROVIDER, operation, ErrorKind::InvalidResponse, e.to_string())
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }
        let response = self
            .http
            .get(&url, &[], self.timeout)
            .await
            .map_err(|e| transport_error(PROVIDER, operation, e))?;
        response.decode(PROVIDER, operation)
    }

    /// Search works by title.
    pub async fn search_by_title(
        &self,
        title: &str,
        limit: u32,
    ) -> Result<SearchResponse, ProviderError> {
        self.search(
            "search_by_title",
            &[("title", title.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    /// Search an author's bibliography.
    pub async fn search_by_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SearchResponse, ProviderError> {
        self.search(
            "search_by_author",
            &[
                ("author", author.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    /// Fetch the edition record for an ISBN. 404 becomes
    /// [`ErrorKind::NotFound`].
    pub async fn search_by_isbn(&self, isbn: &str) -> Result<EditionPayload, ProviderError> {
        let url = self
            .base
            .join(&format!("isbn/{isbn}.json"))
            .map_err(|e| {
                ProviderError::new(
                    PROVIDER,
                    "search_by_isbn",
                    ErrorKind::InvalidResponse,
                    e.to_string(),
                )
            })?;
        let response = self
            .http
            .get(&url, &[], self.timeout)
            .await
            .map_err(|e| transport_error(PROVIDER, "search_by_isbn", e))?;
        response.decode(PROVIDER, "search_by_isbn")
    }

    /// Deterministic cover URL for an Open Library cover id.
    pub fn cover_url(cover_id: i64) -> String {
        format!("https://covers.openlibrary.org/b/id/{cover_id}-L.jpg")
    }
}
