// SPDX-License-Identifier: MIT OR Apache-2.0
//! ISBNdb normalization. ISBNdb records are edition-level, so Works come
//! out synthetic; a completeness score in 0–100 is attached as
//! `isbndb_quality`.

use crate::cover::upgrade_cover_url;
use crate::{UNKNOWN_TITLE, collect_isbns};
use shelf_core::{Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work, genre, year};

/// Normalize one ISBNdb book record into a canonical book.
pub fn book_from_record(record: &shelf_providers::isbndb::IsbndbBook) -> CanonicalBook {
    let edition = edition_from_record(record);

    let work = Work {
        authors: record
            .authors
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(Author::named)
            .collect(),
        subject_tags: genre::normalize_subjects(record.subjects.as_deref().unwrap_or_default()),
        description: record.synopsis.clone(),
        ..Work::synthetic_from_edition(&edition)
    };

    CanonicalBook {
        work,
        editions: vec![edition],
    }
}

/// Normalize the edition-level fields of an ISBNdb record.
pub fn edition_from_record(record: &shelf_providers::isbndb::IsbndbBook) -> Edition {
    let raw_isbns: Vec<&str> = [record.isbn13.as_deref(), record.isbn.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    let (isbn, isbns) = collect_isbns(raw_isbns);

    let mut provenance = Provenance::single(ProviderId::Isbndb);
    provenance.isbndb_quality = Some(completeness_score(record));

    Edition {
        isbn,
        isbns,
        title: record
            .title
            .as_deref()
            .or(record.title_long.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_TITLE)
            .to_string(),
        publisher: record.publisher.clone(),
        publication_date: record.date_published.clone(),
        publication_year: record.date_published.as_deref().and_then(year::extract_year),
        page_count: record.pages,
        format: record
            .binding
            .as_deref()
            .map(BookFormat::from_str_loose)
            .unwrap_or_default(),
        cover_image_url: record.image.as_deref().map(upgrade_cover_url),
        edition_title: record.edition.clone(),
        edition_description: None,
        language: record.language.clone(),
        provenance,
    }
}

/// Fraction of meaningful fields present, as 0–100.
fn completeness_score(record: &shelf_providers::isbndb::IsbndbBook) -> u8 {
    let present = [
        record.title.is_some() || record.title_long.is_some(),
        record.authors.as_deref().is_some_and(|a| !a.is_empty()),
        record.publisher.is_some(),
        record.date_published.is_some(),
        record.pages.is_some(),
        record.binding.is_some(),
        record.image.is_some(),
        record.isbn13.is_some() || record.isbn.is_some(),
        record.language.is_some(),
        record.subjects.as_deref().is_some_and(|s| !s.is_empty()),
    ]
    .into_iter()
    .filter(|&p| p)
    .count();
    (present * 10) as u8
}
