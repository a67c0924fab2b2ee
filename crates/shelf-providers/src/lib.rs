// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed clients for the upstream catalog and AI providers.
//!
//! One client per upstream: Google Books, Open Library, ISBNdb, and the
//! AI vision / CSV parsers. Clients speak through an [`http::HttpBackend`]
//! so tests can substitute the transport, carry a per-call deadline, never
//! retry internally, and fail with a structured [`error::ProviderError`].
//! Secrets come through [`shelf_config::SecretSource`]; a missing secret
//! is an [`error::ErrorKind::AuthMissing`] error, never a panic and never
//! a log line.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ai;
pub mod error;
pub mod google_books;
pub mod http;
pub mod isbndb;
pub mod open_library;

pub use ai::{
    CsvBookRecord, CsvParseClient, CsvParseResult, CsvParser, DetectedBook, ScanResult,
    TokenUsage, VisionClient, VisionProvider,
};
pub use error::{ErrorKind, ProviderError};
pub use google_books::GoogleBooksClient;
pub use http::{HttpBackend, HttpResponse, ReqwestBackend};
pub use isbndb::IsbndbClient;
pub use open_library::OpenLibraryClient;
