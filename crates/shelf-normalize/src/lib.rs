// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure normalizers from provider payloads to the canonical book model.
//!
//! One function per (provider, shape) pair. Normalizers never fail:
//! missing optionals stay empty, a missing title becomes `"Unknown"`, and
//! invalid ISBNs are dropped rather than propagated.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cover;
pub mod google;
pub mod isbndb;
pub mod open_library;

use shelf_core::isbn;
use std::collections::BTreeSet;

/// Title used when a provider record carries none.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Normalize and validate raw ISBN strings into `(primary, all)`.
///
/// Every valid input contributes both its 13- and (where applicable)
/// 10-digit forms; the primary is the first 13-digit form seen. Invalid
/// strings are dropped.
pub fn collect_isbns<'a, I>(raw: I) -> (Option<String>, BTreeSet<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut all = BTreeSet::new();
    let mut primary = None;
    for candidate in raw {
        if let Some((thirteen, forms)) = isbn::preferred_forms(candidate) {
            if primary.is_none() {
                primary = Some(thirteen);
            }
            all.extend(forms);
        }
    }
    (primary, all)
}
