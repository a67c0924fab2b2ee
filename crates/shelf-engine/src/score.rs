// SPDX-License-Identifier: MIT OR Apache-2.0
//! Edition quality scoring and deterministic ranking.

use shelf_core::{BookFormat, Edition};

/// Score one edition on the 0–100 quality scale.
///
/// Base 50, plus bonuses for format, page count, cover resolution,
/// recency, and English text, clamped to the scale.
pub fn quality_score(edition: &Edition) -> u8 {
    let mut score: i32 = 50;

    score += match edition.format {
        BookFormat::Illustrated => 30,
        BookFormat::FirstEdition => 25,
        BookFormat::Anniversary => 20,
        BookFormat::Hardcover => 15,
        BookFormat::Paperback => 10,
        BookFormat::Standard => 5,
        _ => 0,
    };

    score += match edition.page_count {
        Some(pages) if pages > 300 => 10,
        Some(pages) if pages > 200 => 5,
        _ => 0,
    };

    score += cover_bonus(edition.cover_image_url.as_deref());

    score += match edition.publication_year {
        Some(year) if year >= 2020 => 10,
        Some(year) if year >= 2010 => 5,
        _ => 0,
    };

    if edition.language.as_deref() == Some("en") {
        score += 5;
    }

    score.clamp(0, 100) as u8
}

/// Cover resolution bonus: hi-res 15, standard 10, low-res 5, none 0.
///
/// Resolution is inferred from the URL shape providers use: explicit
/// large variants and raised zoom levels count as hi-res, small/thumbnail
/// variants as low-res, everything else as standard.
fn cover_bonus(url: Option<&str>) -> i32 {
    let Some(url) = url else { return 0 };
    let lower = url.to_lowercase();
    if lower.contains("-l.jpg") || lower.contains("large") || lower.contains("zoom=2") || lower.contains("zoom=3")
    {
        15
    } else if lower.contains("-s.jpg") || lower.contains("small") || lower.contains("zoom=1") || lower.contains("thumb")
    {
        5
    } else {
        10
    }
}

/// Sort editions best-first: score descending, then more recent year,
/// then longer page count, then ISBN lexicographic order so the ranking
/// is total and deterministic.
pub fn rank_editions(editions: &mut [Edition]) {
    editions.sort_by(|a, b| {
        quality_score(b)
            .cmp(&quality_score(a))
            .then_with(|| b.publication_year.unwrap_or(i32::MIN).cmp(&a.publication_year.unwrap_or(i32::MIN)))
            .then_with(|| b.page_count.unwrap_or(0).cmp(&a.page_count.unwrap_or(0)))
            .then_with(|| a.isbn.as_deref().unwrap_or("\u{10FFFF}").cmp(b.isbn.as_deref().unwrap_or("\u{10FFFF}")))
    });
}
