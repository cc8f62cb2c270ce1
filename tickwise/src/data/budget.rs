//! Run-wide ceiling on external provider calls.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Call budget shared by every phase of one run.
///
/// Each provider call takes one unit before it is issued. Once the budget is
/// spent no new calls are scheduled; calls already in flight finish.
#[derive(Debug)]
pub struct RunBudget {
    limit: u64,
    used: AtomicU64,
}

impl RunBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Take one unit. Returns false when the budget is spent.
    pub fn try_consume(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn summary(&self) -> BudgetSummary {
        BudgetSummary {
            limit: self.limit,
            used: self.used(),
            exhausted: self.is_exhausted(),
        }
    }
}

/// Budget figures for the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSummary {
    pub limit: u64,
    pub used: u64,
    pub exhausted: bool,
}
