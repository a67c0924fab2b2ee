// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cover URL normalization.

/// Upgrade a provider cover URL: force https, and when the URL carries a
/// `zoom` parameter below 2, raise it to 2 for a higher-resolution
/// variant. Deterministic: the same input always yields the same output.
pub fn upgrade_cover_url(raw: &str) -> String {
    let mut url = if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        raw.to_string()
    };

    if let Some(position) = url.find("zoom=") {
        let value_start = position + "zoom=".len();
        let value_end = url[value_start..]
            .find('&')
            .map_or(url.len(), |offset| value_start + offset);
        if let Ok(zoom) = url[value_start..value_end].parse::<u32>() {
            if zoom < 2 {
                url.replace_range(value_start..value_end, "2");
            }
        }
    }
    url
}
