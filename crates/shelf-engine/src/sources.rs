// SPDX-License-Identifier: MIT OR Apache-2.0
//! The provider seam the orchestrator fans out over.
//!
//! A [`BookSource`] returns canonical books: each adapter pairs one
//! provider client with its normalizers, so the orchestrator never sees
//! wire payloads. Tests stub the trait directly.

use async_trait::async_trait;
use shelf_core::{CanonicalBook, ProviderId};
use shelf_normalize::{google, isbndb, open_library};
use shelf_providers::error::{ErrorKind, ProviderError};
use shelf_providers::{GoogleBooksClient, IsbndbClient, OpenLibraryClient};

/// One upstream catalog viewed canonically.
#[async_trait]
pub trait BookSource: Send + Sync {
    /// Which provider this source wraps.
    fn id(&self) -> ProviderId;

    /// Title search.
    async fn search_title(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError>;

    /// Author bibliography search.
    async fn search_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError>;

    /// Single-book ISBN lookup. Absence is [`ErrorKind::NotFound`].
    async fn search_isbn(&self, isbn: &str) -> Result<CanonicalBook, ProviderError>;
}

// ---------------------------------------------------------------------------
// Google Books
// ---------------------------------------------------------------------------

/// Google Books as a canonical source.
pub struct GoogleBooksSource {
    client: GoogleBooksClient,
}

impl GoogleBooksSource {
    /// Wrap a client.
    pub fn new(client: GoogleBooksClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookSource for GoogleBooksSource {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleBooks
    }

    async fn search_title(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        let response = self.client.search_by_title(query, max_results).await?;
        Ok(response.volumes().iter().map(google::book_from_volume).collect())
    }

    async fn search_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        let response = self.client.search_by_author(author, limit, offset).await?;
        Ok(response.volumes().iter().map(google::book_from_volume).collect())
    }

    async fn search_isbn(&self, isbn: &str) -> Result<CanonicalBook, ProviderError> {
        let response = self.client.search_by_isbn(isbn).await?;
        response
            .volumes()
            .first()
            .map(google::book_from_volume)
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderId::GoogleBooks,
                    "search_isbn",
                    ErrorKind::NotFound,
                    format!("no volume for isbn {isbn}"),
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Open Library
// ---------------------------------------------------------------------------

/// Open Library as a canonical source.
pub struct OpenLibrarySource {
    client: OpenLibraryClient,
}

impl OpenLibrarySource {
    /// Wrap a client.
    pub fn new(client: OpenLibraryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookSource for OpenLibrarySource {
    fn id(&self) -> ProviderId {
        ProviderId::OpenLibrary
    }

    async fn search_title(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        let response = self.client.search_by_title(query, max_results).await?;
        Ok(response.docs.iter().map(open_library::book_from_doc).collect())
    }

    async fn search_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        let response = self.client.search_by_author(author, limit, offset).await?;
        Ok(response.docs.iter().map(open_library::book_from_doc).collect())
    }

    async fn search_isbn(&self, isbn: &str) -> Result<CanonicalBook, ProviderError> {
        let payload = self.client.search_by_isbn(isbn).await?;
        Ok(open_library::book_from_edition(&payload))
    }
}

// ---------------------------------------------------------------------------
// ISBNdb
// ---------------------------------------------------------------------------

/// ISBNdb as a canonical source. ISBN lookups only; it sits at the end of
/// the ISBN chain and never participates in title or author search.
pub struct IsbndbSource {
    client: IsbndbClient,
}

impl IsbndbSource {
    /// Wrap a client.
    pub fn new(client: IsbndbClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookSource for IsbndbSource {
    fn id(&self) -> ProviderId {
        ProviderId::Isbndb
    }

    async fn search_title(
        &self,
        _query: &str,
        _max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        Err(ProviderError::new(
            ProviderId::Isbndb,
            "search_title",
            ErrorKind::NotFound,
            "title search is not part of the ISBNdb contract",
        ))
    }

    async fn search_author(
        &self,
        _author: &str,
        _limit: u32,
        _offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        Err(ProviderError::new(
            ProviderId::Isbndb,
            "search_author",
            ErrorKind::NotFound,
            "author search is not part of the ISBNdb contract",
        ))
    }

    async fn search_isbn(&self, isbn: &str) -> Result<CanonicalBook, ProviderError> {
        let response = self.client.lookup_isbn(isbn).await?;
        Ok(isbndb::book_from_record(&response.book))
    }
}
