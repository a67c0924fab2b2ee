// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-endpoint sampling decisions.
//!
//! Deterministic counter-based sampling: a rate of `0.1` keeps every 10th
//! event for that endpoint. No randomness, so tests and replays are exact.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Decides whether an event for a given endpoint should be emitted.
pub struct Sampler {
    /// endpoint -> keep-every-k. Endpoints not listed are always kept.
    strides: BTreeMap<String, u64>,
    counters: BTreeMap<String, AtomicU64>,
}

impl Sampler {
    /// Build from per-endpoint rates in `[0, 1]`.
    ///
    /// A rate `>= 1` (or an unlisted endpoint) always samples; a rate
    /// `<= 0` never samples; anything between keeps every
    /// `round(1/rate)`-th event.
    pub fn new(rates: &BTreeMap<String, f64>) -> Self {
        let mut strides = BTreeMap::new();
        let mut counters = BTreeMap::new();
        for (endpoint, &rate) in rates {
            let stride = if rate >= 1.0 {
                1
            } else if rate <= 0.0 {
                u64::MAX
            } else {
                (1.0 / rate).round() as u64
            };
            strides.insert(endpoint.clone(), stride.max(1));
            counters.insert(endpoint.clone(), AtomicU64::new(0));
        }
        Self { strides, counters }
    }

    /// Returns `true` when this event should be emitted.
    pub fn should_sample(&self, endpoint: &str) -> bool {
        match self.strides.get(endpoint) {
            None => true,
            Some(&u64::MAX) => false,
            Some(&stride) => {
                let n = self.counters[endpoint].fetch_add(1, Ordering::Relaxed);
                n % stride == 0
            }
        }
    }
}
