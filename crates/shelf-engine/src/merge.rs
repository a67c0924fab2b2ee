// SPDX-License-Identifier: MIT OR Apache-2.0
//! Merging, deduplication, and hole-filling across providers.

use crate::score::rank_editions;
use shelf_core::{CanonicalBook, Edition, Work};
use std::collections::HashMap;

/// Normalize a string for dedup keys: lowercase, alphanumeric words
/// joined by single spaces.
pub fn normalize_for_key(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dedup key for an edition: normalized ISBN-13 when one exists,
/// otherwise normalized title plus first author.
fn edition_key(edition: &Edition, work: &Work) -> String {
    if let Some(isbn13) = edition.isbn13() {
        return format!("isbn:{isbn13}");
    }
    let author = work
        .authors
        .first()
        .map(|a| normalize_for_key(&a.name))
        .unwrap_or_default();
    format!("ta:{}|{author}", normalize_for_key(&edition.title))
}

/// Dedup key for a work: normalized title plus first author.
fn work_key(work: &Work) -> String {
    let author = work
        .authors
        .first()
        .map(|a| normalize_for_key(&a.name))
        .unwrap_or_default();
    format!("{}|{author}", normalize_for_key(&work.title))
}

/// Merge books from one or more providers: works dedupe by normalized
/// title+first-author, their editions pool and dedupe by ISBN (falling
/// back to title+author), and every edition list comes back ranked
/// best-first. Input order decides which work survives a collision, so
/// the primary provider wins.
pub fn dedupe_and_rank(books: Vec<CanonicalBook>) -> Vec<CanonicalBook> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, CanonicalBook> = HashMap::new();

    for book in books {
        let key = work_key(&book.work);
        match merged.get_mut(&key) {
            None => {
                order.push(key.clone());
                merged.insert(key, book);
            }
            Some(existing) => {
                let secondary_work = book.work;
                fill_missing_work(&mut existing.work, &secondary_work);
                existing.editions.extend(book.editions);
            }
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let Some(mut book) = merged.remove(&key) else {
            continue;
        };
        book.editions = dedupe_editions(std::mem::take(&mut book.editions), &book.work);
        out.push(book);
    }
    out
}

fn dedupe_editions(editions: Vec<Edition>, work: &Work) -> Vec<Edition> {
    let mut seen: HashMap<String, Edition> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for edition in editions {
        let key = edition_key(&edition, work);
        match seen.get_mut(&key) {
            None => {
                order.push(key.clone());
                seen.insert(key, edition);
            }
            Some(existing) => {
                fill_missing_edition(existing, &edition);
            }
        }
    }

    let mut out: Vec<Edition> = order.into_iter().filter_map(|k| seen.remove(&k)).collect();
    rank_editions(&mut out);
    out
}

/// Fill holes in `primary` from `secondary` without overwriting anything
/// non-empty, and record the secondary's providers as contributors.
pub fn fill_missing(primary: &mut CanonicalBook, secondary: &CanonicalBook) {
    fill_missing_work(&mut primary.work, &secondary.work);
    match (primary.editions.first_mut(), secondary.editions.first()) {
        (Some(primary_edition), Some(secondary_edition)) => {
            fill_missing_edition(primary_edition, secondary_edition);
        }
        (None, Some(secondary_edition)) => {
            primary.editions.push(secondary_edition.clone());
        }
        _ => {}
    }
    rank_editions(&mut primary.editions);
}

fn fill_missing_work(primary: &mut Work, secondary: &Work) {
    if primary.description.is_none() {
        primary.description = secondary.description.clone();
    }
    if primary.cover_image_url.is_none() {
        primary.cover_image_url = secondary.cover_image_url.clone();
    }
    if primary.original_language.is_none() {
        primary.original_language = secondary.original_language.clone();
    }
    if primary.first_publication_year.is_none() {
        primary.first_publication_year = secondary.first_publication_year;
    }
    if primary.authors.is_empty() {
        primary.authors = secondary.authors.clone();
    }
    primary
        .subject_tags
        .extend(secondary.subject_tags.iter().cloned());
    if primary.provenance.open_library_work_id.is_none() {
        primary.provenance.open_library_work_id =
            secondary.provenance.open_library_work_id.clone();
    }
    primary
        .provenance
        .google_books_volume_ids
        .extend(secondary.provenance.google_books_volume_ids.iter().cloned());
    primary.provenance.google_books_volume_ids.dedup();
    if primary.provenance.isbndb_quality.is_none() {
        primary.provenance.isbndb_quality = secondary.provenance.isbndb_quality;
    }
    for provider in &secondary.provenance.contributors {
        primary.provenance.add_contributor(*provider);
    }
}

fn fill_missing_edition(primary: &mut Edition, secondary: &Edition) {
    if primary.isbn.is_none() {
        primary.isbn = secondary.isbn.clone();
    }
    primary.isbns.extend(secondary.isbns.iter().cloned());
    if primary.publisher.is_none() {
        primary.publisher = secondary.publisher.clone();
    }
    if primary.publication_date.is_none() {
        primary.publication_date = secondary.publication_date.clone();
        primary.publication_year = secondary.publication_year;
    }
    if primary.page_count.is_none() {
        primary.page_count = secondary.page_count;
    }
    if primary.format == shelf_core::BookFormat::Unknown {
        primary.format = secondary.format;
    }
    if primary.cover_image_url.is_none() {
        primary.cover_image_url = secondary.cover_image_url.clone();
    }
    if primary.edition_title.is_none() {
        primary.edition_title = secondary.edition_title.clone();
    }
    if primary.edition_description.is_none() {
        primary.edition_description = secondary.edition_description.clone();
    }
    if primary.language.is_none() {
        primary.language = secondary.language.clone();
    }
    if primary.provenance.isbndb_quality.is_none() {
        primary.provenance.isbndb_quality = secondary.provenance.isbndb_quality;
    }
    for provider in &secondary.provenance.contributors {
        primary.provenance.add_contributor(*provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::{Author, BookFormat, Provenance, ProviderId};
    use std::collections::BTreeSet;

    fn book(
        provider: ProviderId,
        title: &str,
        author: &str,
        isbn: Option<&str>,
        publisher: Option<&str>,
    ) -> CanonicalBook {
        let edition = Edition {
            isbn: isbn.map(String::from),
            isbns: isbn.map(String::from).into_iter().collect(),
            title: title.into(),
            publisher: publisher.map(String::from),
            publication_date: None,
            publication_year: None,
            page_count: None,
            format: BookFormat::Unknown,
            cover_image_url: None,
            edition_title: None,
            edition_description: None,
            language: None,
            provenance: Provenance::single(provider),
        };
        CanonicalBook {
            work: Work {
                title: title.into(),
                authors: vec![Author::named(author)],
                subject_tags: BTreeSet::new(),
                original_language: None,
                first_publication_year: None,
                description: None,
                cover_image_url: None,
                synthetic: false,
                provenance: Provenance::single(provider),
            },
            editions: vec![edition],
        }
    }

    #[test]
    fn works_dedupe_on_title_and_author() {
        let merged = dedupe_and_rank(vec![
            book(ProviderId::GoogleBooks, "Dune", "Frank Herbert", Some("9780441013593"), None),
            book(ProviderId::OpenLibrary, "DUNE", "frank herbert", Some("9780441172719"), None),
            book(ProviderId::GoogleBooks, "Dune Messiah", "Frank Herbert", None, None),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].editions.len(), 2);
        assert_eq!(merged[0].work.provenance.primary_provider, ProviderId::GoogleBooks);
        assert!(
            merged[0]
                .work
                .provenance
                .contributors
                .contains(&ProviderId::OpenLibrary)
        );
    }

    #[test]
    fn editions_dedupe_on_isbn_and_fill_holes() {
        let merged = dedupe_and_rank(vec![
            book(ProviderId::GoogleBooks, "Emma", "Jane Austen", Some("9780141439587"), None),
            book(
                ProviderId::OpenLibrary,
                "Emma",
                "Jane Austen",
                Some("9780141439587"),
                Some("Penguin"),
            ),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].editions.len(), 1);
        // The secondary's publisher filled the hole in the primary.
        assert_eq!(merged[0].editions[0].publisher.as_deref(), Some("Penguin"));
    }

    #[test]
    fn isbn10_and_isbn13_of_same_edition_collide() {
        let mut ten = book(ProviderId::OpenLibrary, "X", "Y", None, None);
        ten.editions[0].isbns = BTreeSet::from(["0141439580".to_string(), "9780141439587".to_string()]);
        let thirteen = book(ProviderId::GoogleBooks, "X", "Y", Some("9780141439587"), None);
        let merged = dedupe_and_rank(vec![thirteen, ten]);
        assert_eq!(merged[0].editions.len(), 1);
    }

    #[test]
    fn fill_missing_never_overwrites() {
        let mut primary = book(
            ProviderId::GoogleBooks,
            "Emma",
            "Jane Austen",
            Some("9780141439587"),
            Some("Primary House"),
        );
        primary.work.description = Some("Primary description".into());
        let mut secondary = book(
            ProviderId::OpenLibrary,
            "Emma",
            "Jane Austen",
            Some("9780141439587"),
            Some("Secondary House"),
        );
        secondary.work.description = Some("Secondary description".into());
        secondary.work.cover_image_url = Some("https://covers.example/emma.jpg".into());

        fill_missing(&mut primary, &secondary);

        assert_eq!(primary.work.description.as_deref(), Some("Primary description"));
        assert_eq!(primary.editions[0].publisher.as_deref(), Some("Primary House"));
        // Holes do fill.
        assert_eq!(
            primary.work.cover_image_url.as_deref(),
            Some("https://covers.example/emma.jpg")
        );
    }

    #[test]
    fn key_normalization_collapses_punctuation() {
        assert_eq!(normalize_for_key("  The Hobbit!  "), "the hobbit");
        assert_eq!(normalize_for_key("O'Brien, Tim"), "o brien tim");
    }
}
