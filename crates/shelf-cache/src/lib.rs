// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical cache keys and the three-tier read-through cache.
//!
//! Keys come from one factory, [`key::CacheKey`], and nowhere else;
//! ad-hoc key composition between a writer and a reader has historically
//! produced silent cache drift. Reads consult edge (hot) → key-value
//! (warm) → object store (cold) in order, rehydrating warmer tiers
//! lazily on a cold hit. Writes go to every tier in parallel. A failing
//! tier is logged and skipped; it never fails the operation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod edge;
pub mod key;
pub mod kv;
pub mod memory;
pub mod object;
pub mod tier;
pub mod tiered;

pub use edge::EdgeTier;
pub use key::CacheKey;
pub use kv::KvTier;
pub use memory::MemoryTier;
pub use object::ObjectTier;
pub use tier::{CacheEntry, CacheTier, TierError};
pub use tiered::{CacheLookup, TieredCache, TtlPolicy};
