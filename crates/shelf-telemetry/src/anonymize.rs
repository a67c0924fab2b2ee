// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-IP anonymization for analytics.
//!
//! IPv4 addresses lose their last octet; IPv6 addresses keep their first
//! 48 bits. Anything unparseable becomes `"unknown"`, never the raw
//! string.

use std::net::IpAddr;

/// Anonymize a client IP for analytics storage.
pub fn anonymize_ip(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.0")
        }
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            format!("{:x}:{:x}:{:x}::", segments[0], segments[1], segments[2])
        }
        Err(_) => "unknown".to_string(),
    }
}
