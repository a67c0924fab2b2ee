// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestrator chain semantics against stub sources.

use async_trait::async_trait;
use shelf_cache::{MemoryTier, TieredCache, TtlPolicy};
use shelf_core::{
    Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work,
};
use shelf_engine::{
    AdvancedQuery, BookSource, EngineError, EnrichmentSeed, Orchestrator, ProviderExclusions,
    SortBy,
};
use shelf_providers::{ErrorKind, ProviderError};
use shelf_telemetry::NullSink;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

fn canonical(provider: ProviderId, title: &str, author: &str, isbn: Option<&str>) -> CanonicalBook {
    let edition = Edition {
        isbn: isbn.map(String::from),
        isbns: isbn.map(String::from).into_iter().collect(),
        title: title.into(),
        publisher: None,
        publication_date: None,
        publication_year: Some(2015),
        page_count: Some(250),
        format: BookFormat::Paperback,
        cover_image_url: None,
        edition_title: None,
        edition_description: None,
        language: Some("en".into()),
        provenance: Provenance::single(provider),
    };
    CanonicalBook {
        work: Work {
            title: title.into(),
            authors: vec![Author::named(author)],
            subject_tags: BTreeSet::new(),
            original_language: Some("en".into()),
            first_publication_year: Some(2015),
            description: None,
            cover_image_url: None,
            synthetic: false,
            provenance: Provenance::single(provider),
        },
        editions: vec![edition],
    }
}

/// Scripted source: every call pops the same configured behavior.
struct StubSource {
    id: ProviderId,
    list_response: Result<Vec<CanonicalBook>, ErrorKind>,
    isbn_response: Result<CanonicalBook, ErrorKind>,
    calls: AtomicU32,
}

impl StubSource {
    fn list(id: ProviderId, response: Result<Vec<CanonicalBook>, ErrorKind>) -> Arc<Self> {
        Arc::new(Self {
            id,
            list_response: response,
            isbn_response: Err(ErrorKind::NotFound),
            calls: AtomicU32::new(0),
        })
    }

    fn isbn(id: ProviderId, response: Result<CanonicalBook, ErrorKind>) -> Arc<Self> {
        Arc::new(Self {
            id,
            list_response: Err(ErrorKind::NotFound),
            isbn_response: response,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn err(&self, operation: &'static str, kind: ErrorKind) -> ProviderError {
        ProviderError::new(self.id, operation, kind, "stubbed failure")
    }
}

#[async_trait]
impl BookSource for StubSource {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn search_title(
        &self,
        _query: &str,
        _max_results: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.list_response
            .clone()
            .map_err(|kind| self.err("search_title", kind))
    }

    async fn search_author(
        &self,
        _author: &str,
        _limit: u32,
        _offset: u32,
    ) -> Result<Vec<CanonicalBook>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.list_response
            .clone()
            .map_err(|kind| self.err("search_author", kind))
    }

    async fn search_isbn(&self, _isbn: &str) -> Result<CanonicalBook, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.isbn_response
            .clone()
            .map_err(|kind| self.err("search_isbn", kind))
    }
}

fn memory_cache() -> Arc<TieredCache> {
    Arc::new(TieredCache::new(
        vec![Arc::new(MemoryTier::new())],
        TtlPolicy::default(),
        Arc::new(NullSink),
    ))
}

fn orchestrator_of(
    search: Vec<Arc<dyn BookSource>>,
    isbn: Vec<Arc<dyn BookSource>>,
) -> Orchestrator {
    Orchestrator::new(search, isbn, memory_cache(), Arc::new(NullSink), 50)
}

// ---------------------------------------------------------------------------
// Fallback coverage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_on_primary_falls_back_to_secondary() {
    let primary = StubSource::list(ProviderId::GoogleBooks, Err(ErrorKind::Timeout));
    let secondary = StubSource::list(
        ProviderId::OpenLibrary,
        Ok(vec![canonical(
            ProviderId::OpenLibrary,
            "Harry Potter and the Philosopher's Stone",
            "J. K. Rowling",
            Some("9780747532699"),
        )]),
    );
    let orchestrator = orchestrator_of(vec![primary, secondary.clone()], vec![]);

    let fetched = orchestrator
        .search_title("Harry Potter and the Philosopher's Stone", 20)
        .await
        .unwrap();
    assert!(!fetched.cached);
    assert_eq!(fetched.value.source, ProviderId::OpenLibrary);
    assert_eq!(
        fetched.value.results[0].work.title,
        "Harry Potter and the Philosopher's Stone"
    );
}

#[tokio::test]
async fn rate_limited_and_not_found_fall_back_too() {
    for kind in [ErrorKind::RateLimited, ErrorKind::NotFound, ErrorKind::Unavailable] {
        let primary = StubSource::list(ProviderId::GoogleBooks, Err(kind));
        let secondary = StubSource::list(
            ProviderId::OpenLibrary,
            Ok(vec![canonical(ProviderId::OpenLibrary, "Dune", "Frank Herbert", None)]),
        );
        let orchestrator = orchestrator_of(vec![primary, secondary], vec![]);
        let fetched = orchestrator.search_title("Dune", 20).await.unwrap();
        assert_eq!(fetched.value.source, ProviderId::OpenLibrary, "kind {kind:?}");
    }
}

#[tokio::test]
async fn auth_missing_marks_degraded_without_failing() {
    let primary = StubSource::list(ProviderId::GoogleBooks, Err(ErrorKind::AuthMissing));
    let secondary = StubSource::list(
        ProviderId::OpenLibrary,
        Ok(vec![canonical(ProviderId::OpenLibrary, "Emma", "Jane Austen", None)]),
    );
    let orchestrator = orchestrator_of(vec![primary, secondary], vec![]);

    let fetched = orchestrator.search_title("Emma", 20).await.unwrap();
    assert_eq!(fetched.value.degraded, vec![ProviderId::GoogleBooks]);
    assert_eq!(fetched.value.source, ProviderId::OpenLibrary);
}

#[tokio::test]
async fn all_hard_failures_surface_provider_error() {
    let primary = StubSource::list(ProviderId::GoogleBooks, Err(ErrorKind::Timeout));
    let secondary = StubSource::list(ProviderId::OpenLibrary, Err(ErrorKind::Unavailable));
    let orchestrator = orchestrator_of(vec![primary, secondary], vec![]);

    let err = orchestrator.search_title("anything", 20).await.unwrap_err();
    assert!(matches!(err, EngineError::AllProvidersFailed));
}

#[tokio::test]
async fn empty_results_are_a_success_not_an_error() {
    let primary = StubSource::list(ProviderId::GoogleBooks, Ok(vec![]));
    let secondary = StubSource::list(ProviderId::OpenLibrary, Err(ErrorKind::Timeout));
    let orchestrator = orchestrator_of(vec![primary, secondary], vec![]);

    let fetched = orchestrator.search_title("obscure", 20).await.unwrap();
    assert_eq!(fetched.value.total_results, 0);
}

// ---------------------------------------------------------------------------
// ISBN chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn isbn_not_found_does_not_end_the_chain() {
    let first = StubSource::isbn(ProviderId::GoogleBooks, Err(ErrorKind::NotFound));
    let second = StubSource::isbn(ProviderId::OpenLibrary, Err(ErrorKind::NotFound));
    let third = StubSource::isbn(
        ProviderId::Isbndb,
        Ok(canonical(ProviderId::Isbndb, "The Hobbit", "J. R. R. Tolkien", Some("9780345339683"))),
    );
    let orchestrator = orchestrator_of(vec![], vec![first.clone(), second.clone(), third]);

    let fetched = orchestrator.search_isbn("9780345339683").await.unwrap();
    assert_eq!(fetched.value.source, ProviderId::Isbndb);
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn isbn_not_found_only_after_full_chain() {
    let chain: Vec<Arc<dyn BookSource>> = vec![
        StubSource::isbn(ProviderId::GoogleBooks, Err(ErrorKind::NotFound)),
        StubSource::isbn(ProviderId::OpenLibrary, Err(ErrorKind::NotFound)),
        StubSource::isbn(ProviderId::Isbndb, Err(ErrorKind::NotFound)),
    ];
    let orchestrator = orchestrator_of(vec![], chain);
    let err = orchestrator.search_isbn("9780000000019").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[tokio::test]
async fn isbn_mixed_failures_surface_provider_error() {
    let chain: Vec<Arc<dyn BookSource>> = vec![
        StubSource::isbn(ProviderId::GoogleBooks, Err(ErrorKind::NotFound)),
        StubSource::isbn(ProviderId::OpenLibrary, Err(ErrorKind::Unavailable)),
    ];
    let orchestrator = orchestrator_of(vec![], chain);
    let err = orchestrator.search_isbn("9780000000019").await.unwrap_err();
    assert!(matches!(err, EngineError::AllProvidersFailed));
}

// ---------------------------------------------------------------------------
// Cache interplay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_lookup_is_served_from_cache_without_provider_calls() {
    let source = StubSource::isbn(
        ProviderId::GoogleBooks,
        Ok(canonical(
            ProviderId::GoogleBooks,
            "The Great Gatsby",
            "F. Scott Fitzgerald",
            Some("9780743273565"),
        )),
    );
    let orchestrator = orchestrator_of(vec![], vec![source.clone()]);

    let first = orchestrator.search_isbn("9780743273565").await.unwrap();
    assert!(!first.cached);
    assert_eq!(source.calls(), 1);

    let second = orchestrator.search_isbn("9780743273565").await.unwrap();
    assert!(second.cached);
    assert_eq!(second.cache_tier, Some("memory"));
    assert_eq!(source.calls(), 1, "cache hit must not call providers");
    assert_eq!(second.value.book.work.title, "The Great Gatsby");
}

#[tokio::test]
async fn isbn_key_is_format_insensitive() {
    let source = StubSource::isbn(
        ProviderId::GoogleBooks,
        Ok(canonical(ProviderId::GoogleBooks, "Gatsby", "Fitzgerald", Some("9780743273565"))),
    );
    let orchestrator = orchestrator_of(vec![], vec![source.clone()]);

    orchestrator.search_isbn("9780743273565").await.unwrap();
    let hyphenated = orchestrator.search_isbn("978-0-7432-7356-5").await.unwrap();
    assert!(hyphenated.cached);
    assert_eq!(source.calls(), 1);
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_exhaustion_is_loud() {
    let chain: Vec<Arc<dyn BookSource>> = (0..3)
        .map(|_| {
            StubSource::isbn(ProviderId::GoogleBooks, Err(ErrorKind::NotFound))
                as Arc<dyn BookSource>
        })
        .collect();
    let orchestrator = Orchestrator::new(
        vec![],
        chain,
        memory_cache(),
        Arc::new(NullSink),
        2, // budget smaller than the chain
    );
    let err = orchestrator.search_isbn("9780000000019").await.unwrap_err();
    assert!(matches!(err, EngineError::Budget(_)));
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrichment_fills_holes_without_overwriting() {
    let mut primary_book =
        canonical(ProviderId::GoogleBooks, "Emma", "Jane Austen", Some("9780141439587"));
    primary_book.work.description = Some("Primary description".into());

    let mut secondary_book =
        canonical(ProviderId::OpenLibrary, "Emma", "Jane Austen", Some("9780141439587"));
    secondary_book.work.description = Some("Secondary description".into());
    secondary_book.work.cover_image_url = Some("https://covers.example/emma.jpg".into());

    let primary = StubSource::isbn(ProviderId::GoogleBooks, Ok(primary_book));
    let secondary = StubSource::isbn(ProviderId::OpenLibrary, Ok(secondary_book));
    let orchestrator = orchestrator_of(vec![], vec![primary, secondary]);

    let budget = orchestrator.new_budget();
    let seed = EnrichmentSeed {
        isbn: Some("9780141439587".into()),
        ..EnrichmentSeed::default()
    };
    let book = orchestrator
        .enrich(&seed, &budget, &ProviderExclusions::new())
        .await
        .unwrap();

    assert_eq!(book.work.description.as_deref(), Some("Primary description"));
    assert_eq!(
        book.work.cover_image_url.as_deref(),
        Some("https://covers.example/emma.jpg")
    );
    assert!(
        book.work
            .provenance
            .contributors
            .contains(&ProviderId::OpenLibrary)
    );
}

#[tokio::test]
async fn rate_limited_provider_is_skipped_for_the_rest_of_the_job() {
    let limited = StubSource::isbn(ProviderId::GoogleBooks, Err(ErrorKind::RateLimited));
    let healthy = StubSource::isbn(
        ProviderId::OpenLibrary,
        Ok(canonical(ProviderId::OpenLibrary, "Any", "Author", None)),
    );
    let orchestrator = orchestrator_of(vec![], vec![limited.clone(), healthy.clone()]);

    // One exclusion set spanning a job's items: the first item records
    // the rate limit, later items never touch that provider again.
    let exclusions = ProviderExclusions::new();
    for isbn in ["9780000000002", "9780000000019", "9780000000026"] {
        let budget = orchestrator.new_budget();
        let seed = EnrichmentSeed {
            isbn: Some(isbn.into()),
            ..EnrichmentSeed::default()
        };
        orchestrator.enrich(&seed, &budget, &exclusions).await.unwrap();
    }

    assert_eq!(limited.calls(), 1, "excluded provider was called again");
    assert_eq!(healthy.calls(), 3);
    assert!(exclusions.contains(ProviderId::GoogleBooks));

    // A fresh job starts with a clean slate.
    let budget = orchestrator.new_budget();
    let seed = EnrichmentSeed {
        isbn: Some("9780000000033".into()),
        ..EnrichmentSeed::default()
    };
    orchestrator
        .enrich(&seed, &budget, &ProviderExclusions::new())
        .await
        .unwrap();
    assert_eq!(limited.calls(), 2);
}

// ---------------------------------------------------------------------------
// Advanced + author sorting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn advanced_with_isbn_short_circuits() {
    let source = StubSource::isbn(
        ProviderId::GoogleBooks,
        Ok(canonical(ProviderId::GoogleBooks, "Dune", "Frank Herbert", Some("9780441013593"))),
    );
    let orchestrator = orchestrator_of(vec![], vec![source]);

    let fetched = orchestrator
        .search_advanced(&AdvancedQuery {
            isbn: Some("9780441013593".into()),
            ..AdvancedQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(fetched.value.total_results, 1);
}

#[tokio::test]
async fn advanced_title_plus_author_filters() {
    let books = vec![
        canonical(ProviderId::GoogleBooks, "Emma", "Jane Austen", None),
        canonical(ProviderId::GoogleBooks, "Emma", "Somebody Else", Some("9780000000026")),
    ];
    let source = StubSource::list(ProviderId::GoogleBooks, Ok(books));
    let orchestrator = orchestrator_of(vec![source], vec![]);

    let fetched = orchestrator
        .search_advanced(&AdvancedQuery {
            title: Some("Emma".into()),
            author: Some("Austen".into()),
            ..AdvancedQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(fetched.value.total_results, 1);
    assert_eq!(fetched.value.results[0].work.authors[0].name, "Jane Austen");
}

#[tokio::test]
async fn author_search_sorts_bibliography() {
    let mut early = canonical(ProviderId::GoogleBooks, "Book A", "Author", None);
    early.work.first_publication_year = Some(1990);
    let mut late = canonical(ProviderId::GoogleBooks, "Book B", "Author", Some("9780000000033"));
    late.work.first_publication_year = Some(2020);

    let source = StubSource::list(ProviderId::GoogleBooks, Ok(vec![late, early]));
    let orchestrator = orchestrator_of(vec![source], vec![]);

    let fetched = orchestrator
        .search_author("Author", 100, 0, SortBy::PublicationYear)
        .await
        .unwrap();
    assert_eq!(fetched.value.results[0].work.first_publication_year, Some(1990));
}
