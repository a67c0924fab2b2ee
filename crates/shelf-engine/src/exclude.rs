// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job-scoped provider exclusion.
//!
//! Rate limiting is handled differently at the two scopes: within one
//! request the chain simply moves past a rate-limited provider, but a
//! pipeline driver working through many items must stop asking that
//! provider for the rest of the job. Drivers create one
//! [`ProviderExclusions`] per job and pass it into every enrichment call;
//! the orchestrator records rate-limited providers into it and skips them
//! on later items.

use shelf_core::ProviderId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Providers a job has stopped calling after a `RateLimited` response.
///
/// Cheap to share across a driver's sequential item loop; interior
/// mutability keeps the orchestrator's `&self` signatures intact.
#[derive(Debug, Default)]
pub struct ProviderExclusions {
    excluded: Mutex<HashSet<ProviderId>>,
}

impl ProviderExclusions {
    /// An empty set: every provider still eligible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `provider` rate limited us; it stays excluded for the
    /// lifetime of this set.
    pub fn exclude(&self, provider: ProviderId) {
        self.excluded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider);
    }

    /// True when `provider` must be skipped.
    pub fn contains(&self, provider: ProviderId) -> bool {
        self.excluded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&provider)
    }

    /// Number of excluded providers.
    pub fn len(&self) -> usize {
        self.excluded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
