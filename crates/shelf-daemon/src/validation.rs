// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request parameter validation for the public API.

use shelf_core::isbn;
use shelf_error::{ErrorCode, ShelfError};
use uuid::Uuid;

/// Default and maximum `maxResults` for searches.
pub const DEFAULT_MAX_RESULTS: u32 = 20;
/// Cap applied to `maxResults`.
pub const MAX_MAX_RESULTS: u32 = 40;
/// Cap applied to author-search `limit`.
pub const MAX_AUTHOR_LIMIT: u32 = 100;

/// Normalize and checksum-validate an ISBN parameter.
///
/// # Errors
///
/// `INVALID_ISBN` when the value is not a valid ISBN-10 or ISBN-13 after
/// hyphen stripping.
pub fn validate_isbn(raw: &str) -> Result<String, ShelfError> {
    let normalized = isbn::normalize(raw);
    if isbn::is_valid(&normalized) {
        Ok(normalized)
    } else {
        Err(ShelfError::new(
            ErrorCode::InvalidIsbn,
            "ISBN must be 10 or 13 digits",
        ))
    }
}

/// Parse `maxResults`, defaulting and capping per the API contract.
///
/// # Errors
///
/// `INVALID_REQUEST` when the value is present but not a positive
/// integer.
pub fn validate_max_results(raw: Option<&str>) -> Result<u32, ShelfError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_RESULTS);
    };
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n.min(MAX_MAX_RESULTS)),
        _ => Err(ShelfError::new(
            ErrorCode::InvalidRequest,
            "maxResults must be a positive integer",
        )),
    }
}

/// Require a non-empty query term.
///
/// # Errors
///
/// `INVALID_REQUEST` when absent or blank.
pub fn validate_query(raw: Option<&str>, name: &str) -> Result<String, ShelfError> {
    match raw.map(str::trim) {
        Some(q) if !q.is_empty() => Ok(q.to_string()),
        _ => Err(ShelfError::new(
            ErrorCode::InvalidRequest,
            format!("query parameter '{name}' is required"),
        )),
    }
}

/// Parse a job id as a UUID.
///
/// # Errors
///
/// `INVALID_REQUEST` when the value is not a UUID.
pub fn validate_job_id(raw: &str) -> Result<Uuid, ShelfError> {
    raw.trim().parse::<Uuid>().map_err(|_| {
        ShelfError::new(ErrorCode::InvalidRequest, "jobId must be a UUID")
    })
}
