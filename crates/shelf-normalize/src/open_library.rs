// SPDX-License-Identifier: MIT OR Apache-2.0
//! Open Library normalization: search docs (work-level) and ISBN edition
//! records.

use crate::{UNKNOWN_TITLE, collect_isbns};
use shelf_core::{
    Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work, genre, year,
};
use shelf_providers::open_library::{EditionPayload, OpenLibraryClient, SearchDoc};

/// Normalize one search doc into a canonical book.
pub fn book_from_doc(doc: &SearchDoc) -> CanonicalBook {
    let title = doc
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TITLE)
        .to_string();
    let cover = doc.cover_i.map(OpenLibraryClient::cover_url);
    let (isbn, isbns) = collect_isbns(
        doc.isbn
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(String::as_str),
    );

    let mut provenance = Provenance::single(ProviderId::OpenLibrary);
    provenance.open_library_work_id = doc
        .key
        .as_deref()
        .map(|k| k.trim_start_matches("/works/").to_string());

    let work = Work {
        title: title.clone(),
        authors: doc
            .author_name
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(Author::named)
            .collect(),
        subject_tags: genre::normalize_subjects(doc.subject.as_deref().unwrap_or_default()),
        original_language: doc
            .language
            .as_deref()
            .unwrap_or_default()
            .first()
            .cloned(),
        first_publication_year: doc.first_publish_year,
        description: None,
        cover_image_url: cover.clone(),
        synthetic: false,
        provenance: provenance.clone(),
    };

    let edition = Edition {
        isbn,
        isbns,
        title,
        publisher: None,
        publication_date: None,
        publication_year: doc.first_publish_year,
        page_count: doc.number_of_pages_median,
        format: BookFormat::Unknown,
        cover_image_url: cover,
        edition_title: None,
        edition_description: None,
        language: doc
            .language
            .as_deref()
            .unwrap_or_default()
            .first()
            .cloned(),
        provenance,
    };

    CanonicalBook {
        work,
        editions: vec![edition],
    }
}

/// Normalize an ISBN edition record. The record is edition-level only, so
/// the Work is fabricated with `synthetic: true`.
pub fn book_from_edition(payload: &EditionPayload) -> CanonicalBook {
    let raw_isbns: Vec<&str> = payload
        .isbn_13
        .as_deref()
        .unwrap_or_default()
        .iter()
        .chain(payload.isbn_10.as_deref().unwrap_or_default())
        .map(String::as_str)
        .collect();
    let (isbn, isbns) = collect_isbns(raw_isbns);

    let mut provenance = Provenance::single(ProviderId::OpenLibrary);
    provenance.open_library_edition_id = payload
        .key
        .as_deref()
        .map(|k| k.trim_start_matches("/books/").to_string());
    provenance.open_library_work_id = payload
        .works
        .as_deref()
        .unwrap_or_default()
        .first()
        .map(|w| w.key.trim_start_matches("/works/").to_string());

    let edition = Edition {
        isbn,
        isbns,
        title: payload
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_TITLE)
            .to_string(),
        publisher: payload
            .publishers
            .as_deref()
            .unwrap_or_default()
            .first()
            .cloned(),
        publication_date: payload.publish_date.clone(),
        publication_year: payload.publish_date.as_deref().and_then(year::extract_year),
        page_count: payload.number_of_pages,
        format: payload
            .physical_format
            .as_deref()
            .map(BookFormat::from_str_loose)
            .unwrap_or_default(),
        cover_image_url: payload
            .covers
            .as_deref()
            .unwrap_or_default()
            .first()
            .map(|&id| OpenLibraryClient::cover_url(id)),
        edition_title: None,
        edition_description: None,
        language: payload
            .languages
            .as_deref()
            .unwrap_or_default()
            .first()
            .map(|l| l.key.trim_start_matches("/languages/").to_string()),
        provenance,
    };

    let work = Work::synthetic_from_edition(&edition);

    CanonicalBook {
        work,
        editions: vec![edition],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_providers::open_library::KeyRef;

    #[test]
    fn doc_normalizes_work_level_fields() {
        let doc = SearchDoc {
            key: Some("/works/OL3140822W".into()),
            title: Some("To Kill a Mockingbird".into()),
            author_name: Some(vec!["Harper Lee".into()]),
            first_publish_year: Some(1960),
            cover_i: Some(12606502),
            subject: Some(vec!["Classic Literature".into()]),
            ..SearchDoc::default()
        };
        let book = book_from_doc(&doc);
        assert!(!book.work.synthetic);
        assert_eq!(
            book.work.provenance.open_library_work_id.as_deref(),
            Some("OL3140822W")
        );
        assert!(book.work.subject_tags.contains("classics"));
        assert_eq!(
            book.work.cover_image_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/12606502-L.jpg")
        );
    }

    #[test]
    fn edition_record_fabricates_synthetic_work() {
        let payload = EditionPayload {
            key: Some("/books/OL7353617M".into()),
            title: Some("Fantastic Mr Fox".into()),
            publishers: Some(vec!["Puffin".into()]),
            publish_date: Some("October 1, 1988".into()),
            number_of_pages: Some(96),
            isbn_13: Some(vec!["9780140328721".into()]),
            isbn_10: Some(vec!["0140328726".into()]),
            physical_format: Some("Paperback".into()),
            works: Some(vec![KeyRef {
                key: "/works/OL45804W".into(),
            }]),
            ..EditionPayload::default()
        };
        let book = book_from_edition(&payload);
        assert!(book.work.synthetic);
        assert_eq!(book.work.title, "Fantastic Mr Fox");
        let edition = &book.editions[0];
        assert_eq!(edition.isbn.as_deref(), Some("9780140328721"));
        assert!(edition.isbns.contains("0140328726"));
        assert_eq!(edition.format, BookFormat::Paperback);
        assert_eq!(edition.publication_year, Some(1988));
        assert_eq!(
            edition.provenance.open_library_work_id.as_deref(),
            Some("OL45804W")
        );
    }

    #[test]
    fn empty_payloads_never_panic() {
        assert_eq!(book_from_doc(&SearchDoc::default()).work.title, UNKNOWN_TITLE);
        assert_eq!(
            book_from_edition(&EditionPayload::default()).work.title,
            UNKNOWN_TITLE
        );
    }
}
