// SPDX-License-Identifier: MIT OR Apache-2.0
//! ISBNdb lookup and cover client. Requires an API key.

use crate::error::{ErrorKind, ProviderError};
use crate::http::{HttpBackend, transport_error};
use serde::{Deserialize, Serialize};
use shelf_config::SecretString;
use shelf_core::ProviderId;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const PROVIDER: ProviderId = ProviderId::Isbndb;

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// `GET /book/{isbn}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookResponse {
    /// The book record.
    pub book: IsbndbBook,
}

/// One ISBNdb book record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IsbndbBook {
    /// Short title.
    pub title: Option<String>,
    /// Long title.
    pub title_long: Option<String>,
    /// Author display names.
    pub authors: Option<Vec<String>>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// Free-form publication date.
    pub date_published: Option<String>,
    /// Page count.
    pub pages: Option<u32>,
    /// Binding string ("Hardcover", "Mass Market Paperback", ...).
    pub binding: Option<String>,
    /// Cover image URL.
    pub image: Option<String>,
    /// ISBN-13.
    pub isbn13: Option<String>,
    /// ISBN-10.
    pub isbn: Option<String>,
    /// ISO language code.
    pub language: Option<String>,
    /// Subject strings.
    pub subjects: Option<Vec<String>>,
    /// Edition statement.
    pub edition: Option<String>,
    /// Synopsis.
    pub synopsis: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// ISBNdb client. Calls without a configured key fail with
/// [`ErrorKind::AuthMissing`] before touching the network.
pub struct IsbndbClient {
    http: Arc<dyn HttpBackend>,
    base: Url,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl IsbndbClient {
    /// Build a client against `base` (e.g. `https://api2.isbndb.com`).
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

    fn auth_header(&self, operation: &'static str) -> Result<(&'static str, String), ProviderError> {
        match &self.api_key {
            Some(key) => Ok(("Authorization", key.expose().to_string())),
            None => Err(ProviderError::new(
                PROVIDER,
                operation,
                ErrorKind::AuthMissing,
                "ISBNdb API key is not configured",
            )),
        }
    }

    /// Look up one book by ISBN.
    pub async fn lookup_isbn(&self, isbn: &str) -> Result<BookResponse, ProviderError> {
        let auth = self.auth_header("lookup_isbn")?;
        let url = self.base.join(&format!("book/{isbn}")).map_err(|e| {
            ProviderError::new(PROVIDER, "lookup_isbn", ErrorKind::InvalidResponse, e.to_string())
        })?;
        let response = self
            .http
            .get(&url, &[auth], self.timeout)
            .await
            .map_err(|e| transport_error(PROVIDER, "lookup_isbn", e))?;
        response.decode(PROVIDER, "lookup_isbn")
    }

    /// The cover URL for an ISBN, when ISBNdb has one.
    pub async fn cover_for_isbn(&self, isbn: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.lookup_isbn(isbn).await?.book.image)
    }
}
