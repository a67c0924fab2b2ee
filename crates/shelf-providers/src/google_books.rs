// SPDX-License-Identifier: MIT OR Apache-2.0
//! Google Books volumes API client.

use crate::error::{ErrorKind, ProviderError};
use crate::http::{HttpBackend, transport_error};
use serde::{Deserialize, Serialize};
use shelf_config::SecretString;
use shelf_core::ProviderId;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const PROVIDER: ProviderId = ProviderId::GoogleBooks;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// `GET /volumes` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumesResponse {
    /// Total matches upstream, which can exceed the returned page.
    pub total_items: u32,
    /// Returned volumes; absent when nothing matched.
    pub items: Option<Vec<Volume>>,
}

impl VolumesResponse {
    /// The returned volumes, empty when the field was absent.
    pub fn volumes(&self) -> &[Volume] {
        self.items.as_deref().unwrap_or_default()
    }
}

/// One volume record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    /// Volume id.
    pub id: String,
    /// Nested bibliographic data.
    pub volume_info: VolumeInfo,
}

/// The `volumeInfo` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeInfo {
    /// Title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Author display names.
    pub authors: Option<Vec<String>>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// Free-form publication date.
    pub published_date: Option<String>,
    /// Description / synopsis.
    pub description: Option<String>,
    /// ISBN identifiers.
    pub industry_identifiers: Option<Vec<IndustryIdentifier>>,
    /// Page count.
    pub page_count: Option<u32>,
    /// BISAC category strings.
    pub categories: Option<Vec<String>>,
    /// Cover image links by size.
    pub image_links: Option<ImageLinks>,
    /// ISO language code.
    pub language: Option<String>,
}

/// One entry of `industryIdentifiers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndustryIdentifier {
    /// `ISBN_10`, `ISBN_13`, or `OTHER`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The identifier value.
    pub identifier: String,
}

/// The `imageLinks` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageLinks {
    /// Tiny thumbnail.
    pub small_thumbnail: Option<String>,
    /// Thumbnail (carries a `zoom` parameter).
    pub thumbnail: Option<String>,
    /// Small image.
    pub small: Option<String>,
    /// Medium image.
    pub medium: Option<String>,
    /// Large image.
    pub large: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Google Books client. The API key is optional; anonymous calls work
/// with lower quotas, so a missing key degrades rather than fails.
pub struct GoogleBooksClient {
    http: Arc<dyn HttpBackend>,
    base: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl GoogleBooksClient {
    /// Build a client against `base` (e.g.
    /// `https://www.googleapis.com/books/v1`).
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidResponse`] when `base` is not a valid URL.
    pub fn new(
        http: Arc<dyn HttpBackend>,
        base: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base = Url::parse(base).map_err(|e| {
            ProviderError::new(PROVIDER, "new", ErrorKind::InvalidResponse, e.to_string())
        })?;
        Ok(Self {
            http,
            base,
            api_key,
            timeout,
        })
    }

    fn volumes_url(&self, query: &str, max_results: u32, start_index: u32) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::new(
                    PROVIDER,
                    "volumes_url",
                    ErrorKind::InvalidResponse,
                    "base URL cannot be a base",
                )
            })?
            .push("volumes");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("maxResults", &max_results.to_string());
            if start_index > 0 {
                pairs.append_pair("startIndex", &start_index.to_string());
            }
            pairs.append_pair("printType", "books");
            if let Some(key) = &self.api_key {
                pairs.append_pair("key", key.expose());
            }
        }
        Ok(url)
    }

    async fn fetch_volumes(
        &self,
        operation: &'static str,
        url: Url,
    ) -> Result<VolumesResponse, ProviderError> {
        let response = self
            .http
            .get(&url, &[], self.timeout)
            .await
            .map_err(|e| transport_error(PROVIDER, operation, e))?;
        response.decode(PROVIDER, operation)
    }

    /// Search volumes by title.
    pub async fn search_by_title(
        &self,
        title: &str,
        max_results: u32,
    ) -> Result<VolumesResponse, ProviderError> {
        let url = self.volumes_url(&format!("intitle:{title}"), max_results, 0)?;
        self.fetch_volumes("search_by_title", url).await
    }

    /// Search volumes by ISBN.
    pub async fn search_by_isbn(&self, isbn: &str) -> Result<VolumesResponse, ProviderError> {
        let url = self.volumes_url(&format!("isbn:{isbn}"), 5, 0)?;
        self.fetch_volumes("search_by_isbn", url).await
    }

    /// Search an author's bibliography.
    pub async fn search_by_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
    ) -> Result<VolumesResponse, ProviderError> {
        let url = self.volumes_url(&format!("inauthor:{author}"), limit, offset)?;
        self.fetch_volumes("search_by_author", url).await
    }

    /// Fetch one volume by id.
    pub async fn get_by_volume_id(&self, volume_id: &str) -> Result<Volume, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::new(
                    PROVIDER,
                    "get_by_volume_id",
                    ErrorKind::InvalidResponse,
                    "base URL cannot be a base",
                )
            })?
            .push("volumes")
            .push(volume_id);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key.expose());
        }
        let response = self
            .http
            .get(&url, &[], self.timeout)
            .await
            .map_err(|e| transport_error(PROVIDER, "get_by_volume_id", e))?;
        response.decode(PROVIDER, "get_by_volume_id")
    }
}
