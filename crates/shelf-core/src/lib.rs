// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical book model and wire envelopes for Shelfstack.
//!
//! This crate is the shared contract between the provider clients, the
//! normalizers, the orchestrator, and the HTTP surface: the [`Work`] /
//! [`Edition`] / [`Author`] DTOs, ISBN and publication-year utilities, the
//! genre vocabulary, and the unified `{data, metadata}` / `{error}` response
//! envelope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod genre;
pub mod isbn;
pub mod model;
pub mod year;

pub use envelope::{ApiEnvelope, ErrorBody, ResponseMetadata};
pub use model::{Author, BookFormat, CanonicalBook, Edition, Gender, ProviderId, Provenance, ReviewStatus, Work};
