//! Historical backfill.
//!
//! Symbols with too little stored history get a longer window fetched,
//! cleaned and stored together with an indicator set for every bar.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tickwise_common::RunSettings;
use tracing::{debug, error, info};

use super::{persist_with_retry, OptionalPhase, PhaseContext, PhaseReport};
use crate::clean::CleanReport;
use crate::data::DateRange;
use crate::indicators::IndicatorSet;
use crate::ingest::Unresolved;

pub const PHASE_BACKFILL: &str = "backfill";

#[derive(Debug, Clone)]
pub struct BackfillPhase {
    /// Symbols with fewer stored bars are backfilled
    min_bars: usize,
    /// Calendar days fetched
    days: u32,
}

impl BackfillPhase {
    pub fn new(min_bars: usize, days: u32) -> Self {
        Self {
            min_bars,
            days: days.max(1),
        }
    }

    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(settings.backfill_min_bars, settings.backfill_days)
    }
}

#[async_trait]
impl OptionalPhase for BackfillPhase {
    fn name(&self) -> &'static str {
        PHASE_BACKFILL
    }

    async fn run(&self, ctx: &PhaseContext<'_>) -> PhaseReport {
        let mut report = PhaseReport::start(PHASE_BACKFILL);

        let mut candidates = Vec::new();
        for symbol in ctx.symbols {
            match ctx.store.bar_count(symbol).await {
                Ok(count) if count < self.min_bars => candidates.push(symbol.clone()),
                Ok(_) => {}
                Err(e) => report.fail(symbol.clone(), e.to_string()),
            }
        }
        if candidates.is_empty() {
            debug!("No symbols need backfill");
            return report.finish();
        }

        info!(symbols = candidates.len(), days = self.days, "Backfilling history");
        let range = DateRange::ending(ctx.as_of, self.days);
        let outcome = ctx.ingestor.ingest(&candidates, range, ctx.budget).await;
        report.budget_exhausted = outcome.budget_exhausted;

        for (symbol, unresolved) in &outcome.unresolved {
            match unresolved {
                Unresolved::Failed(reason) => report.fail(symbol.clone(), reason.clone()),
                Unresolved::Deferred | Unresolved::Skipped => report.skip(symbol.clone()),
            }
        }

        let cleaned: BTreeMap<String, CleanReport> = outcome
            .bars
            .into_iter()
            .map(|(symbol, bars)| (symbol, ctx.cleaner.clean(bars)))
            .collect();

        for (symbol, series) in cleaned {
            if series.bars.is_empty() {
                report.fail(symbol, "no valid bars after cleaning");
                continue;
            }

            let name = symbol.clone();
            let engine = Arc::clone(ctx.engine);
            let history = tokio::task::spawn_blocking(move || {
                let sets: Vec<IndicatorSet> =
                    engine.compute_history(&symbol, &series.bars, series.low_confidence);
                (symbol, series, sets)
            })
            .await;
            let (symbol, series, sets) = match history {
                Ok(computed) => computed,
                Err(e) => {
                    error!(symbol = %name, error = %e, "Backfill indicator task failed");
                    report.fail(name, e.to_string());
                    continue;
                }
            };

            match persist_with_retry(ctx.store, &symbol, &series, &sets).await {
                Ok(count) => {
                    debug!(symbol = %symbol, bars = count, "Backfilled");
                    report.succeed();
                }
                Err(e) => report.fail(symbol, e.to_string()),
            }
        }

        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = RunSettings::default();
        let phase = BackfillPhase::from_settings(&settings);
        assert_eq!(phase.min_bars, settings.backfill_min_bars);
        assert_eq!(phase.days, settings.backfill_days);
        assert_eq!(phase.name(), PHASE_BACKFILL);
    }
}
