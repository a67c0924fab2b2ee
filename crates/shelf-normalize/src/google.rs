// SPDX-License-Identifier: MIT OR Apache-2.0
//! Google Books volume normalization.

use crate::cover::upgrade_cover_url;
use crate::{UNKNOWN_TITLE, collect_isbns};
use shelf_core::{
    Author, BookFormat, CanonicalBook, Edition, Provenance, ProviderId, Work, genre, year,
};
use shelf_providers::google_books::{ImageLinks, Volume};
use std::collections::BTreeSet;

/// Normalize one volume into a canonical book.
pub fn book_from_volume(volume: &Volume) -> CanonicalBook {
    CanonicalBook {
        work: work_from_volume(volume),
        editions: vec![edition_from_volume(volume)],
    }
}

/// Normalize a volume's work-level data.
pub fn work_from_volume(volume: &Volume) -> Work {
    let info = &volume.volume_info;
    Work {
        title: title_of(volume),
        authors: authors_from_volume(volume),
        subject_tags: genre::normalize_subjects(info.categories.as_deref().unwrap_or_default()),
        original_language: info.language.clone(),
        first_publication_year: info.published_date.as_deref().and_then(year::extract_year),
        description: info.description.clone(),
        cover_image_url: best_cover(info.image_links.as_ref()),
        synthetic: false,
        provenance: provenance_of(volume),
    }
}

/// Normalize a volume's edition-level data.
pub fn edition_from_volume(volume: &Volume) -> Edition {
    let info = &volume.volume_info;
    let identifiers: Vec<&str> = info
        .industry_identifiers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|id| id.kind.starts_with("ISBN"))
        .map(|id| id.identifier.as_str())
        .collect();
    let (isbn, isbns) = collect_isbns(identifiers);

    Edition {
        isbn,
        isbns,
        title: title_of(volume),
        publisher: info.publisher.clone(),
        publication_date: info.published_date.clone(),
        publication_year: info.published_date.as_deref().and_then(year::extract_year),
        page_count: info.page_count,
        format: BookFormat::Unknown,
        cover_image_url: best_cover(info.image_links.as_ref()),
        edition_title: info.subtitle.clone(),
        edition_description: None,
        language: info.language.clone(),
        provenance: provenance_of(volume),
    }
}

/// Normalize a volume's authors.
pub fn authors_from_volume(volume: &Volume) -> Vec<Author> {
    volume
        .volume_info
        .authors
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(Author::named)
        .collect()
}

fn title_of(volume: &Volume) -> String {
    volume
        .volume_info
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN_TITLE)
        .to_string()
}

fn provenance_of(volume: &Volume) -> Provenance {
    let mut provenance = Provenance::single(ProviderId::GoogleBooks);
    if !volume.id.is_empty() {
        provenance.google_books_volume_ids = vec![volume.id.clone()];
    }
    provenance
}

fn best_cover(links: Option<&ImageLinks>) -> Option<String> {
    let links = links?;
    [
        links.large.as_deref(),
        links.medium.as_deref(),
        links.small.as_deref(),
        links.thumbnail.as_deref(),
        links.small_thumbnail.as_deref(),
    ]
    .into_iter()
    .flatten()
    .next()
    .map(upgrade_cover_url)
}

/// Subject tags across a set of volumes, merged.
pub fn merged_subject_tags(volumes: &[Volume]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for volume in volumes {
        tags.extend(genre::normalize_subjects(
            volume.volume_info.categories.as_deref().unwrap_or_default(),
        ));
    }
    tags
}
