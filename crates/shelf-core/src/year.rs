// SPDX-License-Identifier: MIT OR Apache-2.0
//! Publication-year extraction from free-form date strings.

use regex::Regex;
use std::sync::LazyLock;

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").unwrap_or_else(|e| panic!("year regex: {e}")));

/// Extract a four-digit year from `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, or
/// free-form dates ("Sep 30, 2004", "First published 1965").
///
/// Returns the first plausible match; years outside 1000–2999 are ignored.
pub fn extract_year(date: &str) -> Option<i32> {
    for caps in YEAR_RE.captures_iter(date) {
        if let Ok(year) = caps[1].parse::<i32>() {
            if (1000..3000).contains(&year) {
                return Some(year);
            }
        }
    }
    None
}
