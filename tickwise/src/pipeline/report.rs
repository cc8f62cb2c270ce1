//! Run and phase reports.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::data::budget::BudgetSummary;
use crate::data::router::{FailureRecord, ProviderStatus};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Finished, but the call budget cut at least one phase short
    CompletedBudgetExhausted,
    SkippedNonTradingDay,
}

/// Counts and per-symbol outcomes of one phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseReport {
    pub name: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Failure reason per symbol
    pub failures: BTreeMap<String, String>,
    pub skipped_symbols: Vec<String>,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
    #[serde(skip)]
    started: Option<Instant>,
}

impl PhaseReport {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// A phase that never ran; every symbol counts as skipped.
    pub fn skipped_entirely(name: impl Into<String>, symbols: &[String]) -> Self {
        let mut report = Self::start(name);
        for symbol in symbols {
            report.skip(symbol.clone());
        }
        report.finish()
    }

    pub fn succeed(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn fail(&mut self, symbol: impl Into<String>, reason: impl Into<String>) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.insert(symbol.into(), reason.into());
    }

    pub fn skip(&mut self, symbol: impl Into<String>) {
        self.skipped += 1;
        self.skipped_symbols.push(symbol.into());
    }

    pub fn finish(mut self) -> Self {
        if let Some(started) = self.started.take() {
            self.duration_ms = started.elapsed().as_millis() as u64;
        }
        self
    }
}

/// Everything a run did, serialisable for logs and callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub forced: bool,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseReport>,
    /// Symbols whose cleaning fell back to raw data
    pub low_confidence: Vec<String>,
    /// Symbols no provider was available for
    pub deferred: Vec<String>,
    pub budget: BudgetSummary,
    pub providers: Vec<ProviderStatus>,
    pub failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_counts() {
        let mut phase = PhaseReport::start("clean");
        phase.succeed();
        phase.fail("BAD", "no valid bars");
        phase.skip("LATE");
        let phase = phase.finish();

        assert_eq!(phase.attempted, 2);
        assert_eq!(phase.succeeded, 1);
        assert_eq!(phase.failed, 1);
        assert_eq!(phase.skipped, 1);
        assert_eq!(phase.failures["BAD"], "no valid bars");
    }

    #[test]
    fn test_skipped_entirely() {
        let symbols = vec!["A".to_string(), "B".to_string()];
        let phase = PhaseReport::skipped_entirely("backfill", &symbols);
        assert_eq!(phase.attempted, 0);
        assert_eq!(phase.skipped, 2);
    }

    #[test]
    fn test_status_serialises_snake_case() {
        let json = serde_json::to_string(&RunStatus::CompletedBudgetExhausted).unwrap();
        assert_eq!(json, "\"completed_budget_exhausted\"");
    }
}
