// SPDX-License-Identifier: MIT OR Apache-2.0
//! Genre normalization: heterogeneous provider subject strings mapped into
//! a bounded tag vocabulary.
//!
//! Pure function over a static table; subjects that match nothing are
//! dropped rather than passed through.

use std::collections::BTreeSet;
use std::sync::LazyLock;

/// `(needle, tag)` pairs checked against the lowercased subject string.
/// First match wins per needle; one subject may yield several tags.
static TAG_TABLE: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    vec![
        ("science fiction", "science-fiction"),
        ("sci-fi", "science-fiction"),
        ("space opera", "science-fiction"),
        ("fantasy", "fantasy"),
        ("epic fantasy", "fantasy"),
        ("magic", "fantasy"),
        ("mystery", "mystery"),
        ("detective", "mystery"),
        ("crime", "mystery"),
        ("thriller", "thriller"),
        ("suspense", "thriller"),
        ("horror", "horror"),
        ("romance", "romance"),
        ("historical fiction", "historical-fiction"),
        ("history", "history"),
        ("biography", "biography"),
        ("autobiography", "biography"),
        ("memoir", "biography"),
        ("poetry", "poetry"),
        ("drama", "drama"),
        ("plays", "drama"),
        ("philosophy", "philosophy"),
        ("psychology", "psychology"),
        ("self-help", "self-help"),
        ("self help", "self-help"),
        ("business", "business"),
        ("economics", "business"),
        ("science", "science"),
        ("mathematics", "science"),
        ("physics", "science"),
        ("biology", "science"),
        ("technology", "technology"),
        ("computers", "technology"),
        ("programming", "technology"),
        ("travel", "travel"),
        ("cooking", "cooking"),
        ("cookery", "cooking"),
        ("art", "art"),
        ("music", "music"),
        ("religion", "religion"),
        ("young adult", "young-adult"),
        ("juvenile fiction", "children"),
        ("children", "children"),
        ("picture book", "children"),
        ("comics", "graphic-novel"),
        ("graphic novel", "graphic-novel"),
        ("manga", "graphic-novel"),
        ("classics", "classics"),
        ("classic literature", "classics"),
        ("literary fiction", "literary-fiction"),
        ("short stories", "short-stories"),
        ("humor", "humor"),
        ("humour", "humor"),
        ("true crime", "true-crime"),
        ("education", "education"),
        ("politics", "politics"),
        ("political science", "politics"),
        ("nature", "nature"),
        ("sports", "sports"),
        ("health", "health"),
        ("fitness", "health"),
        ("fiction", "fiction"),
        ("nonfiction", "nonfiction"),
        ("non-fiction", "nonfiction"),
    ]
});

/// Map raw provider subject/category strings into the bounded vocabulary.
///
/// Matching is case-insensitive substring containment; the result is a
/// sorted, deduplicated set. An input like `"Fiction / Science Fiction /
/// Space Opera"` yields `{"fiction", "science-fiction"}`.
pub fn normalize_subjects<S: AsRef<str>>(subjects: &[S]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for subject in subjects {
        let lower = subject.as_ref().to_lowercase();
        for (needle, tag) in TAG_TABLE.iter() {
            if lower.contains(needle) {
                tags.insert((*tag).to_string());
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_compound_bisac_headings() {
        let tags = normalize_subjects(&["Fiction / Science Fiction / Space Opera"]);
        assert!(tags.contains("fiction"));
        assert!(tags.contains("science-fiction"));
    }

    #[test]
    fn merges_across_subjects() {
        let tags = normalize_subjects(&["Epic Fantasy", "Young Adult", "Magic"]);
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["fantasy", "young-adult"]
        );
    }

    #[test]
    fn unknown_subjects_drop() {
        assert!(normalize_subjects(&["Basket Weaving Quarterly"]).is_empty());
        assert!(normalize_subjects::<&str>(&[]).is_empty());
    }

    #[test]
    fn case_insensitive() {
        let tags = normalize_subjects(&["MYSTERY & DETECTIVE"]);
        assert!(tags.contains("mystery"));
    }
}
