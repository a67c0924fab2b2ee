// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asynchronous ingestion drivers.
//!
//! Each driver runs outside any request's subrequest budget, drives its
//! job entity through the state machine, checks for cancellation at every
//! unit of work, retries individual items within a small budget, and
//! spills large result sets to the object store behind a `resultsUrl`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod csv;
pub mod enrich;
pub mod results;
pub mod retry;
pub mod scan;

pub use csv::CsvDriver;
pub use enrich::{EnrichmentDriver, GoogleVolumeResolver, VolumeResolver};
pub use results::{FsResultStore, MemoryResultStore, ResultStore, ResultStoreError};
pub use retry::RetryPolicy;
pub use scan::{BatchImage, ScanDriver};

use shelf_jobs::JobEntityError;
use std::time::Duration;

/// Driver tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts per item for retryable failures.
    pub retry: RetryPolicy,
    /// Result payloads above this many serialized bytes spill to the
    /// object store.
    pub result_spill_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            result_spill_bytes: 256 * 1024,
        }
    }
}

/// True for entity errors that mean the driver should stop quietly: the
/// job reached a terminal state under it (cancellation) or the entity is
/// gone.
pub(crate) fn is_stop_signal(err: &JobEntityError) -> bool {
    matches!(
        err,
        JobEntityError::TerminalState { .. }
            | JobEntityError::EntityGone
            | JobEntityError::NotInitialized
    )
}

/// Fixed backoff between item retries.
pub(crate) const fn default_backoff() -> Duration {
    Duration::from_millis(500)
}
