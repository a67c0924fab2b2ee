// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request upstream call budget.
//!
//! The platform the service runs on caps subrequests per request; the
//! architecture depends on staying under it. The budget makes the cap a
//! local invariant: every upstream call takes a unit, and exhaustion is a
//! loud error instead of a silent platform kill.

use std::sync::atomic::{AtomicU32, Ordering};

/// Counting budget for upstream calls within one logical request.
#[derive(Debug)]
pub struct UpstreamBudget {
    remaining: AtomicU32,
}

/// Error returned when the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("upstream call budget exceeded")]
pub struct BudgetExceeded;

impl UpstreamBudget {
    /// A budget of `max` calls.
    pub fn new(max: u32) -> Self {
        Self {
            remaining: AtomicU32::new(max),
        }
    }

    /// Take one call unit.
    ///
    /// # Errors
    ///
    /// [`BudgetExceeded`] once the budget is spent; the request must not
    /// issue further upstream calls.
    pub fn take(&self) -> Result<(), BudgetExceeded> {
        let mut current = self.remaining.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return Err(BudgetExceeded);
            }
            match self.remaining.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Units left.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }
}
