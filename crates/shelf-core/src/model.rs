// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical entities: works, editions, authors, and their provenance.
//!
//! Field names are wire contracts; everything serialises in `camelCase`
//! and the shapes here are what the cache stores and the HTTP surface
//! returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// ProviderId
// ---------------------------------------------------------------------------

/// Identifies an upstream catalog or AI provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Google Books volumes API.
    GoogleBooks,
    /// Open Library search and edition APIs.
    OpenLibrary,
    /// ISBNdb lookup and cover API.
    Isbndb,
    /// AI vision provider (bookshelf image scanning).
    AiVision,
    /// AI CSV parsing provider.
    AiCsv,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GoogleBooks => "google_books",
            Self::OpenLibrary => "open_library",
            Self::Isbndb => "isbndb",
            Self::AiVision => "ai_vision",
            Self::AiCsv => "ai_csv",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Human review state of a curated record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Not yet looked at by a reviewer.
    #[default]
    Unverified,
    /// Confirmed correct.
    Verified,
    /// Confirmed wrong; excluded from curated output.
    Rejected,
}

/// Author gender, enriched out-of-band and never blocking the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    /// Male.
    Male,
    /// Female.
    Female,
    /// Non-binary.
    NonBinary,
    /// Not known.
    #[default]
    Unknown,
}

/// Physical or digital format of an [`Edition`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookFormat {
    /// Hardcover binding.
    Hardcover,
    /// Trade paperback.
    Paperback,
    /// Mass-market paperback.
    MassMarket,
    /// Electronic edition.
    Ebook,
    /// Audio edition.
    Audiobook,
    /// Illustrated edition.
    Illustrated,
    /// First edition printing.
    FirstEdition,
    /// Anniversary edition.
    Anniversary,
    /// Explicitly standard edition.
    Standard,
    /// Format not known.
    #[default]
    Unknown,
}

impl BookFormat {
    /// Best-effort mapping from a free-form binding/format string.
    ///
    /// Providers disagree wildly here ("Mass Market Paperback", "Kindle
    /// Edition", "Audio CD", ...); unknown strings map to
    /// [`BookFormat::Unknown`] rather than failing.
    pub fn from_str_loose(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        if lower.is_empty() {
            return Self::Unknown;
        }
        if lower.contains("anniversary") {
            Self::Anniversary
        } else if lower.contains("first edition") || lower.contains("1st edition") {
            Self::FirstEdition
        } else if lower.contains("illustrated") {
            Self::Illustrated
        } else if lower.contains("mass market") {
            Self::MassMarket
        } else if lower.contains("hardcover") || lower.contains("hardback") {
            Self::Hardcover
        } else if lower.contains("paperback") || lower.contains("softcover") {
            Self::Paperback
        } else if lower.contains("audio") {
            Self::Audiobook
        } else if lower.contains("ebook") || lower.contains("kindle") || lower.contains("epub") {
            Self::Ebook
        } else if lower == "standard" {
            Self::Standard
        } else {
            Self::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which providers produced a record and the external ids they supplied.
///
/// Shared between [`Work`] and [`Edition`]; flattened into both on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// Provider that supplied the bulk of the record.
    pub primary_provider: ProviderId,
    /// Ordered list of every provider that contributed data.
    pub contributors: Vec<ProviderId>,
    /// Google Books volume ids attached to this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub google_books_volume_ids: Vec<String>,
    /// Open Library work id (`/works/OL...W`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_library_work_id: Option<String>,
    /// Open Library edition id (`OL...M`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_library_edition_id: Option<String>,
    /// ISBNdb data-completeness score, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbndb_quality: Option<u8>,
    /// Human review state.
    #[serde(default)]
    pub review_status: ReviewStatus,
}

impl Provenance {
    /// A provenance record with a single contributing provider.
    pub fn single(provider: ProviderId) -> Self {
        Self {
            primary_provider: provider,
            contributors: vec![provider],
            google_books_volume_ids: Vec::new(),
            open_library_work_id: None,
            open_library_edition_id: None,
            isbndb_quality: None,
            review_status: ReviewStatus::Unverified,
        }
    }

    /// Record that `provider` also contributed data, keeping order and
    /// uniqueness.
    pub fn add_contributor(&mut self, provider: ProviderId) {
        if !self.contributors.contains(&provider) {
            self.contributors.push(provider);
        }
    }
}

// ---------------------------------------------------------------------------
// Author
// ---------------------------------------------------------------------------

/// A contributor to a [`Work`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Display name as supplied by the provider.
    pub name: String,
    /// Gender, enriched in a separate stage; defaults to unknown.
    #[serde(default)]
    pub gender: Gender,
}

impl Author {
    /// An author with unknown gender.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gender: Gender::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// A conceptual book: one title plus authors, independent of edition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    /// Title; never empty, normalizers fall back to `"Unknown"`.
    pub title: String,
    /// Contributors in provider order.
    pub authors: Vec<Author>,
    /// Normalized subject tags from the bounded genre vocabulary.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub subject_tags: BTreeSet<String>,
    /// ISO language code of the original text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_language: Option<String>,
    /// Year of first publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_publication_year: Option<i32>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cover image URL (https).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    /// True when this Work was fabricated from an Edition because no
    /// Work-level record was available upstream.
    #[serde(default)]
    pub synthetic: bool,
    /// Provider provenance.
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Work {
    /// Fabricate a synthetic Work from an Edition that arrived without a
    /// Work-level record.
    pub fn synthetic_from_edition(edition: &Edition) -> Self {
        Self {
            title: edition.title.clone(),
            authors: Vec::new(),
            subject_tags: BTreeSet::new(),
            original_language: edition.language.clone(),
            first_publication_year: edition.publication_year,
            description: edition.edition_description.clone(),
            cover_image_url: edition.cover_image_url.clone(),
            synthetic: true,
            provenance: edition.provenance.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Edition
// ---------------------------------------------------------------------------

/// A specific publication of a [`Work`], keyed by ISBN where one exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edition {
    /// Primary ISBN, hyphen-free, 13-digit form preferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    /// Every known ISBN-10/13 for this edition, normalized.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub isbns: BTreeSet<String>,
    /// Title as printed on this edition.
    pub title: String,
    /// Publisher name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Free-form publication date as supplied upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    /// Year extracted from `publication_date` where possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i32>,
    /// Page count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Binding / format.
    #[serde(default)]
    pub format: BookFormat,
    /// Cover image URL (https).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    /// Edition-specific title ("20th Anniversary Edition"), if distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_title: Option<String>,
    /// Edition-specific description, if distinct from the Work's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_description: Option<String>,
    /// ISO language code of this edition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Provider provenance.
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Edition {
    /// The 13-digit ISBN for this edition, if any of its ISBNs is one.
    pub fn isbn13(&self) -> Option<&str> {
        self.isbns
            .iter()
            .map(String::as_str)
            .find(|i| i.len() == 13)
            .or(self.isbn.as_deref().filter(|i| i.len() == 13))
    }
}

// ---------------------------------------------------------------------------
// CanonicalBook
// ---------------------------------------------------------------------------

/// A Work together with its known Editions, the unit the orchestrator
/// merges, scores, and returns.
///
/// Invariant: `editions` is ordered best-first by quality score once the
/// orchestrator has processed the book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBook {
    /// The conceptual work.
    pub work: Work,
    /// Known editions, best first.
    pub editions: Vec<Edition>,
}

impl CanonicalBook {
    /// The highest-ranked edition, if any.
    pub fn best_edition(&self) -> Option<&Edition> {
        self.editions.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_loose_strings() {
        assert_eq!(BookFormat::from_str_loose("Hardcover"), BookFormat::Hardcover);
        assert_eq!(
            BookFormat::from_str_loose("Mass Market Paperback"),
            BookFormat::MassMarket
        );
        assert_eq!(BookFormat::from_str_loose("Kindle Edition"), BookFormat::Ebook);
        assert_eq!(BookFormat::from_str_loose("Audio CD"), BookFormat::Audiobook);
        assert_eq!(
            BookFormat::from_str_loose("25th Anniversary Illustrated"),
            BookFormat::Anniversary
        );
        assert_eq!(BookFormat::from_str_loose("???"), BookFormat::Unknown);
        assert_eq!(BookFormat::from_str_loose(""), BookFormat::Unknown);
    }

    #[test]
    fn synthetic_work_carries_edition_fields() {
        let edition = Edition {
            isbn: Some("9780345391803".into()),
            isbns: BTreeSet::from(["9780345391803".to_string()]),
            title: "The Hitchhiker's Guide to the Galaxy".into(),
            publisher: Some("Del Rey".into()),
            publication_date: Some("1995-09-27".into()),
            publication_year: Some(1995),
            page_count: Some(224),
            format: BookFormat::Paperback,
            cover_image_url: Some("https://example.org/cover.jpg".into()),
            edition_title: None,
            edition_description: Some("A reissue.".into()),
            language: Some("en".into()),
            provenance: Provenance::single(ProviderId::GoogleBooks),
        };

        let work = Work::synthetic_from_edition(&edition);
        assert!(work.synthetic);
        assert_eq!(work.title, edition.title);
        assert_eq!(work.cover_image_url, edition.cover_image_url);
        assert_eq!(work.first_publication_year, Some(1995));
    }

    #[test]
    fn provenance_contributors_stay_unique() {
        let mut p = Provenance::single(ProviderId::GoogleBooks);
        p.add_contributor(ProviderId::OpenLibrary);
        p.add_contributor(ProviderId::OpenLibrary);
        assert_eq!(
            p.contributors,
            vec![ProviderId::GoogleBooks, ProviderId::OpenLibrary]
        );
    }

    #[test]
    fn work_serializes_camel_case() {
        let work = Work {
            title: "Dune".into(),
            authors: vec![Author::named("Frank Herbert")],
            subject_tags: BTreeSet::from(["science-fiction".to_string()]),
            original_language: Some("en".into()),
            first_publication_year: Some(1965),
            description: None,
            cover_image_url: None,
            synthetic: false,
            provenance: Provenance::single(ProviderId::GoogleBooks),
        };
        let json = serde_json::to_value(&work).unwrap();
        assert_eq!(json["firstPublicationYear"], 1965);
        assert_eq!(json["primaryProvider"], "google_books");
        assert_eq!(json["subjectTags"][0], "science-fiction");
        assert!(json.get("first_publication_year").is_none());
    }
}
