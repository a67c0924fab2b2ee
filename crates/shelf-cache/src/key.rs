// SPDX-License-Identifier: MIT OR Apache-2.0
//! The cache key factory, the single source of truth for key layout.
//!
//! Grammar: `<endpoint>:<sorted k=v joined by '&'>`, all lowercase.
//! Single-id endpoints (`book:isbn:9780345391803`, `cover:9780345391803`)
//! use the bare-id form.

/// Deterministic cache key builder.
pub struct CacheKey;

impl CacheKey {
    /// Build a parameterized key: keys lowercased and sorted, values
    /// trimmed, lowercased, and whitespace-collapsed; ISBN-valued
    /// parameters additionally lose their hyphens.
    ///
    /// `build("search:title", &[("title", "The Hobbit"), ("maxResults", "20")])`
    /// yields `search:title:maxresults=20&title=the hobbit`.
    pub fn build(endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut normalized: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| {
                let key = k.trim().to_lowercase();
                let mut value = normalize_value(v);
                if key == "isbn" {
                    value.retain(|c| c != '-' && c != ' ');
                }
                (key, value)
            })
            .collect();
        normalized.sort();

        let joined = normalized
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{joined}", endpoint.trim().to_lowercase())
    }

    /// Build a bare-id key for single-parameter endpoints. The id is
    /// normalized like an ISBN value (lowercased, hyphens and spaces
    /// stripped).
    ///
    /// `build_id("book:isbn", "978-0-345-39180-3")` yields
    /// `book:isbn:9780345391803`.
    pub fn build_id(endpoint: &str, id: &str) -> String {
        let mut value = normalize_value(id);
        value.retain(|c| c != '-' && c != ' ');
        format!("{}:{value}", endpoint.trim().to_lowercase())
    }

    /// The cold-index companion key for a cache key.
    pub fn cold_index(key: &str) -> String {
        format!("cold-index:{key}")
    }

    /// The endpoint portion of a built key (everything before the last
    /// `:` segment), used for TTL policy lookups.
    pub fn endpoint_of(key: &str) -> &str {
        key.rsplit_once(':').map_or(key, |(endpoint, _)| endpoint)
    }
}

fn normalize_value(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matches_documented_examples() {
        assert_eq!(
            CacheKey::build("search:title", &[("title", "The Hobbit"), ("maxResults", "20")]),
            "search:title:maxresults=20&title=the hobbit"
        );
        assert_eq!(
            CacheKey::build(
                "search:author",
                &[
                    ("author", "Harper Lee"),
                    ("limit", "100"),
                    ("offset", "0"),
                    ("sortBy", "publicationYear"),
                ]
            ),
            "search:author:author=harper lee&limit=100&offset=0&sortby=publicationyear"
        );
        assert_eq!(
            CacheKey::build_id("book:isbn", "978-0-345-39180-3"),
            "book:isbn:9780345391803"
        );
        assert_eq!(CacheKey::build_id("cover", "9780345391803"), "cover:9780345391803");
    }

    #[test]
    fn isbn_param_loses_hyphens() {
        assert_eq!(
            CacheKey::build("search:isbn", &[("isbn", "978-0-7432-7356-5")]),
            "search:isbn:isbn=9780743273565"
        );
    }

    #[test]
    fn endpoint_of_round_trips() {
        let key = CacheKey::build("search:title", &[("title", "dune")]);
        assert_eq!(CacheKey::endpoint_of(&key), "search:title");
        assert_eq!(
            CacheKey::endpoint_of("book:isbn:9780345391803"),
            "book:isbn"
        );
    }

    #[test]
    fn cold_index_prefixes() {
        assert_eq!(
            CacheKey::cold_index("cover:9780345391803"),
            "cold-index:cover:9780345391803"
        );
    }

    proptest! {
        // Key construction is invariant under parameter order and value
        // whitespace.
        #[test]
        fn order_and_whitespace_invariant(
            title in "[a-zA-Z ]{1,20}",
            max in 1u32..=40,
        ) {
            let spaced = format!("  {}  ", title.split_whitespace().collect::<Vec<_>>().join("   "));
            let max_str = max.to_string();
            let a = CacheKey::build("search:title", &[("title", &title), ("maxResults", &max_str)]);
            let b = CacheKey::build("search:title", &[("maxResults", &max_str), ("title", &spaced)]);
            prop_assert_eq!(a, b);
        }

        // ISBN formatting never changes the key.
        #[test]
        fn isbn_format_invariant(hyphens in proptest::bool::ANY) {
            let raw = if hyphens { "978-0-345-39180-3" } else { "9780345391803" };
            prop_assert_eq!(
                CacheKey::build_id("book:isbn", raw),
                "book:isbn:9780345391803"
            );
        }
    }
}
