// SPDX-License-Identifier: MIT OR Apache-2.0
//! The provider orchestrator: chain policy, merging, and cache
//! write-through for one logical query.

use crate::budget::{BudgetExceeded, UpstreamBudget};
use crate::exclude::ProviderExclusions;
use crate::merge::{dedupe_and_rank, fill_missing, normalize_for_key};
use crate::sources::BookSource;
use serde::{Deserialize, Serialize};
use shelf_cache::{CacheEntry, CacheKey, TieredCache};
use shelf_core::{CanonicalBook, ProviderId};
use shelf_providers::error::ErrorKind;
use shelf_telemetry::{MetricEvent, MetricsSink};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Sort order for author bibliographies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Chronological by first publication year.
    #[default]
    PublicationYear,
    /// Alphabetical by title.
    Title,
}

impl SortBy {
    /// Parse the `sortBy` query parameter; unknown values fall back to
    /// publication year.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "title" => Self::Title,
            _ => Self::PublicationYear,
        }
    }

    /// The canonical parameter form, used in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublicationYear => "publicationyear",
            Self::Title => "title",
        }
    }
}

/// A multi-field search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedQuery {
    /// Title terms.
    pub title: Option<String>,
    /// Author terms.
    pub author: Option<String>,
    /// Exact ISBN.
    pub isbn: Option<String>,
    /// Result cap.
    pub max_results: Option<u32>,
}

/// A list-shaped search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    /// Merged, deduplicated, ranked books.
    pub results: Vec<CanonicalBook>,
    /// Result count (after merging).
    pub total_results: u32,
    /// Provider that supplied the winning results.
    pub source: ProviderId,
    /// Providers skipped for missing credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<ProviderId>,
}

/// A single-book result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookOutcome {
    /// The merged book.
    pub book: CanonicalBook,
    /// Provider that supplied the winning record.
    pub source: ProviderId,
    /// Providers skipped for missing credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<ProviderId>,
}

/// A value plus where it came from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    /// The payload.
    pub value: T,
    /// True when served from cache.
    pub cached: bool,
    /// The tier that served it, when cached.
    pub cache_tier: Option<&'static str>,
}

/// Orchestration failures that surface to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Every provider in the chain reported the resource absent.
    #[error("no provider had the requested resource")]
    NotFound,
    /// Every provider in the chain failed.
    #[error("every provider in the chain failed")]
    AllProvidersFailed,
    /// The per-request upstream budget was exhausted.
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
}

/// A unit of enrichment input: an ISBN when known, otherwise title and
/// author terms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentSeed {
    /// Exact ISBN.
    pub isbn: Option<String>,
    /// Title terms.
    pub title: Option<String>,
    /// Author terms.
    pub author: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

enum ListOp<'a> {
    Title { query: &'a str, max_results: u32 },
    Author { query: &'a str, limit: u32, offset: u32 },
}

/// The per-query provider orchestrator. Construction wires the chains;
/// every method is one logical query.
pub struct Orchestrator {
    search_chain: Vec<Arc<dyn BookSource>>,
    isbn_chain: Vec<Arc<dyn BookSource>>,
    cache: Arc<TieredCache>,
    metrics: Arc<dyn MetricsSink>,
    max_upstream_calls: u32,
}

impl Orchestrator {
    /// Wire an orchestrator.
    ///
    /// `search_chain` is the title/author fallback order (primary first);
    /// `isbn_chain` is the ISBN lookup order and usually extends the
    /// search chain with ISBN-only providers.
    pub fn new(
        search_chain: Vec<Arc<dyn BookSource>>,
        isbn_chain: Vec<Arc<dyn BookSource>>,
        cache: Arc<TieredCache>,
        metrics: Arc<dyn MetricsSink>,
        max_upstream_calls: u32,
    ) -> Self {
        Self {
            search_chain,
            isbn_chain,
            cache,
            metrics,
            max_upstream_calls,
        }
    }

    /// A fresh per-request budget at the configured cap.
    pub fn new_budget(&self) -> UpstreamBudget {
        UpstreamBudget::new(self.max_upstream_calls)
    }

    /// Title search with cache read-through.
    pub async fn search_title(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Fetched<SearchOutcome>, EngineError> {
        let key = CacheKey::build(
            "search:title",
            &[("title", query), ("maxresults", &max_results.to_string())],
        );
        if let Some(hit) = self.cached_outcome::<SearchOutcome>(&key).await {
            return Ok(hit);
        }

        let budget = self.new_budget();
        let op = ListOp::Title {
            query,
            max_results,
        };
        let (books, source, degraded) = self.run_list_chain(op, &budget).await?;
        let outcome = SearchOutcome {
            total_results: books.len() as u32,
            results: books,
            source,
            degraded,
        };
        self.store_outcome(&key, &outcome, source).await;
        Ok(Fetched {
            value: outcome,
            cached: false,
            cache_tier: None,
        })
    }

    /// Author bibliography with cache read-through.
    pub async fn search_author(
        &self,
        author: &str,
        limit: u32,
        offset: u32,
        sort_by: SortBy,
    ) -> Result<Fetched<SearchOutcome>, EngineError> {
        let key = CacheKey::build(
            "search:author",
            &[
                ("author", author),
                ("limit", &limit.to_string()),
                ("offset", &offset.to_string()),
                ("sortby", sort_by.as_str()),
            ],
        );
        if let Some(hit) = self.cached_outcome::<SearchOutcome>(&key).await {
            return Ok(hit);
        }

        let budget = self.new_budget();
        let op = ListOp::Author {
            query: author,
            limit,
            offset,
        };
        let (mut books, source, degraded) = self.run_list_chain(op, &budget).await?;
        sort_bibliography(&mut books, sort_by);
        let outcome = SearchOutcome {
            total_results: books.len() as u32,
            results: books,
            source,
            degraded,
        };
        self.store_outcome(&key, &outcome, source).await;
        Ok(Fetched {
            value: outcome,
            cached: false,
            cache_tier: None,
        })
    }

    /// ISBN lookup across the full chain with cache read-through.
    ///
    /// A single provider's `NotFound` does not end the chain; `NotFound`
    /// surfaces only after every provider reported it.
    pub async fn search_isbn(&self, isbn: &str) -> Result<Fetched<BookOutcome>, EngineError> {
        let key = CacheKey::build("search:isbn", &[("isbn", isbn)]);
        if let Some(hit) = self.cached_outcome::<BookOutcome>(&key).await {
            return Ok(hit);
        }

        let budget = self.new_budget();
        let (book, source, degraded) = self.run_isbn_chain(isbn, &budget).await?;
        let outcome = BookOutcome {
            book,
            source,
            degraded,
        };
        self.store_outcome(&key, &outcome, source).await;
        Ok(Fetched {
            value: outcome,
            cached: false,
            cache_tier: None,
        })
    }

    /// Multi-field search. An ISBN short-circuits to the ISBN chain;
    /// otherwise title terms drive the search and author terms filter it.
    pub async fn search_advanced(
        &self,
        query: &AdvancedQuery,
    ) -> Result<Fetched<SearchOutcome>, EngineError> {
        let max_results = query.max_results.unwrap_or(20);

        if let Some(isbn) = query.isbn.as_deref() {
            let fetched = self.search_isbn(isbn).await?;
            return Ok(Fetched {
                value: SearchOutcome {
                    results: vec![fetched.value.book],
                    total_results: 1,
                    source: fetched.value.source,
                    degraded: fetched.value.degraded,
                },
                cached: fetched.cached,
                cache_tier: fetched.cache_tier,
            });
        }

        match (query.title.as_deref(), query.author.as_deref()) {
            (Some(title), Some(author)) => {
                let mut fetched = self.search_title(title, max_results).await?;
                let needle = normalize_for_key(author);
                fetched.value.results.retain(|book| {
                    book.work
                        .authors
                        .iter()
                        .any(|a| normalize_for_key(&a.name).contains(&needle))
                });
                fetched.value.total_results = fetched.value.results.len() as u32;
                Ok(fetched)
            }
            (Some(title), None) => self.search_title(title, max_results).await,
            (None, Some(author)) => {
                self.search_author(author, max_results, 0, SortBy::default()).await
            }
            (None, None) => Err(EngineError::NotFound),
        }
    }

    /// Enrich one book: primary record filled from the secondary without
    /// overwriting. Uses the caller's budget so pipeline drivers amortise
    /// one budget across a job item, and the caller's `exclusions` so a
    /// provider that rate limits once stays skipped for the rest of that
    /// job.
    pub async fn enrich(
        &self,
        seed: &EnrichmentSeed,
        budget: &UpstreamBudget,
        exclusions: &ProviderExclusions,
    ) -> Result<CanonicalBook, EngineError> {
        if let Some(isbn) = seed.isbn.as_deref() {
            return self.enrich_by_isbn(isbn, budget, exclusions).await;
        }

        let Some(title) = seed.title.as_deref() else {
            return Err(EngineError::NotFound);
        };

        let mut primary: Option<CanonicalBook> = None;
        let mut had_hard_failure = false;
        for (depth, source) in self.search_chain.iter().enumerate() {
            if exclusions.contains(source.id()) {
                continue;
            }
            budget.take()?;
            let started = Instant::now();
            let result = source.search_title(title, 3).await;
            self.record_provider(source.id(), "enrich_title", result.is_ok(), started, depth);
            match result {
                Ok(books) => {
                    let best = pick_by_author(books, seed.author.as_deref());
                    match (&mut primary, best) {
                        (None, Some(book)) => primary = Some(book),
                        (Some(existing), Some(book)) => fill_missing(existing, &book),
                        _ => {}
                    }
                }
                Err(err) => match err.kind {
                    ErrorKind::RateLimited => exclusions.exclude(source.id()),
                    ErrorKind::Timeout
                    | ErrorKind::Unavailable
                    | ErrorKind::InvalidResponse
                    | ErrorKind::Transport => had_hard_failure = true,
                    ErrorKind::NotFound | ErrorKind::AuthMissing => {}
                },
            }
        }

        match primary {
            Some(book) => Ok(book),
            None if had_hard_failure => Err(EngineError::AllProvidersFailed),
            None => Err(EngineError::NotFound),
        }
    }

    async fn enrich_by_isbn(
        &self,
        isbn: &str,
        budget: &UpstreamBudget,
        exclusions: &ProviderExclusions,
    ) -> Result<CanonicalBook, EngineError> {
        let key = CacheKey::build_id("book:isbn", isbn);
        let lookup = self.cache.get(&key).await;
        if let Some(entry) = lookup.entry {
            if let Ok(book) = serde_json::from_value::<CanonicalBook>(entry.value) {
                return Ok(book);
            }
        }

        let mut primary: Option<CanonicalBook> = None;
        let mut had_hard_failure = false;
        for (depth, source) in self.isbn_chain.iter().enumerate() {
            if exclusions.contains(source.id()) {
                continue;
            }
            budget.take()?;
            let started = Instant::now();
            let result = source.search_isbn(isbn).await;
            self.record_provider(source.id(), "enrich_isbn", result.is_ok(), started, depth);
            match result {
                Ok(book) => match &mut primary {
                    None => primary = Some(book),
                    Some(existing) => fill_missing(existing, &book),
                },
                Err(err) => match err.kind {
                    ErrorKind::RateLimited => exclusions.exclude(source.id()),
                    ErrorKind::Timeout
                    | ErrorKind::Unavailable
                    | ErrorKind::InvalidResponse
                    | ErrorKind::Transport => had_hard_failure = true,
                    ErrorKind::NotFound | ErrorKind::AuthMissing => {}
                },
            }
        }

        match primary {
            Some(book) => {
                let source = book.work.provenance.primary_provider;
                let entry = CacheEntry::now(
                    serde_json::to_value(&book).unwrap_or_default(),
                    source.to_string(),
                );
                self.cache.set(&key, &entry).await;
                Ok(book)
            }
            None if had_hard_failure => Err(EngineError::AllProvidersFailed),
            None => Err(EngineError::NotFound),
        }
    }

    // -- chain plumbing ----------------------------------------------------

    async fn run_list_chain(
        &self,
        op: ListOp<'_>,
        budget: &UpstreamBudget,
    ) -> Result<(Vec<CanonicalBook>, ProviderId, Vec<ProviderId>), EngineError> {
        let mut degraded = Vec::new();
        let mut had_soft_outcome = false;
        let mut had_hard_failure = false;

        for (depth, source) in self.search_chain.iter().enumerate() {
            budget.take()?;
            let started = Instant::now();
            let (operation, result) = match &op {
                ListOp::Title { query, max_results } => (
                    "search_title",
                    source.search_title(query, *max_results).await,
                ),
                ListOp::Author {
                    query,
                    limit,
                    offset,
                } => (
                    "search_author",
                    source.search_author(query, *limit, *offset).await,
                ),
            };
            self.record_provider(source.id(), operation, result.is_ok(), started, depth);

            match result {
                Ok(books) if !books.is_empty() => {
                    return Ok((dedupe_and_rank(books), source.id(), degraded));
                }
                Ok(_) => had_soft_outcome = true,
                Err(err) => {
                    debug!(provider = %source.id(), operation, kind = ?err.kind, "provider call failed");
                    match err.kind {
                        ErrorKind::NotFound => had_soft_outcome = true,
                        ErrorKind::AuthMissing => degraded.push(source.id()),
                        ErrorKind::RateLimited
                        | ErrorKind::Timeout
                        | ErrorKind::Unavailable
                        | ErrorKind::InvalidResponse
                        | ErrorKind::Transport => had_hard_failure = true,
                    }
                }
            }
        }

        if had_soft_outcome {
            let primary = self
                .search_chain
                .first()
                .map(|s| s.id())
                .unwrap_or(ProviderId::GoogleBooks);
            Ok((Vec::new(), primary, degraded))
        } else {
            warn!(had_hard_failure, "search chain exhausted without results");
            Err(EngineError::AllProvidersFailed)
        }
    }

    async fn run_isbn_chain(
        &self,
        isbn: &str,
        budget: &UpstreamBudget,
    ) -> Result<(CanonicalBook, ProviderId, Vec<ProviderId>), EngineError> {
        let mut degraded = Vec::new();
        let mut had_hard_failure = false;

        for (depth, source) in self.isbn_chain.iter().enumerate() {
            budget.take()?;
            let started = Instant::now();
            let result = source.search_isbn(isbn).await;
            self.record_provider(source.id(), "search_isbn", result.is_ok(), started, depth);
            match result {
                Ok(mut book) => {
                    crate::score::rank_editions(&mut book.editions);
                    return Ok((book, source.id(), degraded));
                }
                Err(err) => {
                    debug!(provider = %source.id(), kind = ?err.kind, "isbn lookup failed");
                    match err.kind {
                        ErrorKind::NotFound => {}
                        ErrorKind::AuthMissing => degraded.push(source.id()),
                        _ => had_hard_failure = true,
                    }
                }
            }
        }

        if had_hard_failure {
            Err(EngineError::AllProvidersFailed)
        } else {
            Err(EngineError::NotFound)
        }
    }

    /// Emit the per-call provider metric.
    fn record_provider(
        &self,
        provider: ProviderId,
        operation: &'static str,
        success: bool,
        started: Instant,
        depth: usize,
    ) {
        self.metrics.record(MetricEvent::Provider {
            provider: provider.to_string(),
            operation: operation.to_string(),
            success,
            latency_ms: started.elapsed().as_millis() as u64,
            chain_depth: depth as u32 + 1,
        });
    }

    // -- cache plumbing ----------------------------------------------------

    async fn cached_outcome<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<Fetched<T>> {
        let lookup = self.cache.get(key).await;
        let tier = lookup.tier;
        let entry = lookup.entry?;
        match serde_json::from_value::<T>(entry.value) {
            Ok(value) => Some(Fetched {
                value,
                cached: true,
                cache_tier: tier,
            }),
            Err(err) => {
                warn!(key, error = %err, "cached entry failed to decode, treating as miss");
                None
            }
        }
    }

    async fn store_outcome<T: Serialize>(&self, key: &str, outcome: &T, source: ProviderId) {
        match serde_json::to_value(outcome) {
            Ok(value) => {
                let entry = CacheEntry::now(value, source.to_string());
                self.cache.set(key, &entry).await;
            }
            Err(err) => warn!(key, error = %err, "outcome failed to serialize for cache"),
        }
    }
}

fn sort_bibliography(books: &mut [CanonicalBook], sort_by: SortBy) {
    match sort_by {
        SortBy::PublicationYear => books.sort_by_key(|b| {
            (
                b.work.first_publication_year.unwrap_or(i32::MAX),
                b.work.title.clone(),
            )
        }),
        SortBy::Title => books.sort_by_key(|b| b.work.title.to_lowercase()),
    }
}

fn pick_by_author(books: Vec<CanonicalBook>, author: Option<&str>) -> Option<CanonicalBook> {
    match author {
        None => books.into_iter().next(),
        Some(author) => {
            let needle = normalize_for_key(author);
            let mut fallback = None;
            for book in books {
                let matches = book
                    .work
                    .authors
                    .iter()
                    .any(|a| normalize_for_key(&a.name).contains(&needle));
                if matches {
                    return Some(book);
                }
                if fallback.is_none() {
                    fallback = Some(book);
                }
            }
            fallback
        }
    }
}
