// SPDX-License-Identifier: MIT OR Apache-2.0
//! ISBN normalization, validation, and conversion.
//!
//! ISBNs are stored hyphen-free with the 13-digit form preferred; the
//! 10-digit form is accepted everywhere and carried alongside.

/// Strip hyphens and whitespace and uppercase a trailing `x` check digit.
///
/// Idempotent: normalizing an already-normalized ISBN is a no-op.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Returns `true` if `isbn` (already normalized) is a valid ISBN-10,
/// including the mod-11 checksum with `X` as the value 10.
pub fn is_valid_isbn10(isbn: &str) -> bool {
    let bytes = isbn.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let mut sum: u32 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let value = match b {
            b'0'..=b'9' => u32::from(b - b'0'),
            b'X' if i == 9 => 10,
            _ => return false,
        };
        sum += value * (10 - i as u32);
    }
    sum % 11 == 0
}

/// Returns `true` if `isbn` (already normalized) is a valid ISBN-13,
/// including the alternating 1/3-weight mod-10 checksum.
pub fn is_valid_isbn13(isbn: &str) -> bool {
    let bytes = isbn.as_bytes();
    if bytes.len() != 13 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let sum: u32 = bytes
        .iter()
        .enumerate()
        .map(|(i, &b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    sum % 10 == 0
}

/// Returns `true` if `isbn` (already normalized) is a valid ISBN-10 or
/// ISBN-13.
pub fn is_valid(isbn: &str) -> bool {
    is_valid_isbn10(isbn) || is_valid_isbn13(isbn)
}

/// Convert a valid ISBN-10 to its `978`-prefixed ISBN-13 form.
///
/// Returns `None` when the input is not a valid ISBN-10.
pub fn isbn10_to_isbn13(isbn10: &str) -> Option<String> {
    if !is_valid_isbn10(isbn10) {
        return None;
    }
    let mut digits: Vec<u32> = "978"
        .chars()
        .chain(isbn10.chars().take(9))
        .map(|c| c.to_digit(10))
        .collect::<Option<_>>()?;
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| d * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    digits.push((10 - sum % 10) % 10);
    Some(digits.into_iter().map(|d| char::from_digit(d, 10).unwrap_or('0')).collect())
}

/// Normalize `raw` and return the preferred 13-digit form when the input is
/// a valid ISBN, together with the set of all known forms.
///
/// `("9780306406157", {"9780306406157", "0306406152"})` for a 10-digit
/// input; `None` for anything that fails validation.
pub fn preferred_forms(raw: &str) -> Option<(String, Vec<String>)> {
    let normalized = normalize(raw);
    if is_valid_isbn13(&normalized) {
        Some((normalized.clone(), vec![normalized]))
    } else if is_valid_isbn10(&normalized) {
        let thirteen = isbn10_to_isbn13(&normalized)?;
        Some((thirteen.clone(), vec![thirteen, normalized]))
    } else {
        None
    }
}
