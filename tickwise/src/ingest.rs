//! Batch ingestion.
//!
//! Splits the symbol universe into bounded batches and runs them through the
//! provider router on a bounded number of concurrent workers. A symbol is
//! resolved once some provider returns a bar for the latest trading day of
//! the requested range (weekends and configured holidays excluded);
//! otherwise it moves on to the next provider, up to `max_attempts`
//! providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tickwise_common::IngestionSettings;
use tracing::{debug, info, warn};

use crate::data::router::{ProviderRouter, RouteError};
use crate::data::{DateRange, PriceBar, RunBudget, TradingCalendar};

// ============================================================================
// Configuration
// ============================================================================

/// Batch ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Symbols per batch
    pub max_batch_size: usize,
    /// Providers tried per symbol before giving up
    pub max_attempts: u32,
    /// Concurrent batches
    pub worker_count: usize,
    /// Decides which date counts as fresh data
    pub calendar: TradingCalendar,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from(&IngestionSettings::default())
    }
}

impl From<&IngestionSettings> for IngestConfig {
    fn from(settings: &IngestionSettings) -> Self {
        Self {
            max_batch_size: settings.max_batch_size.max(1),
            max_attempts: settings.max_attempts.max(1),
            worker_count: settings.worker_count.max(1),
            calendar: TradingCalendar::from(settings),
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Why a symbol did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum Unresolved {
    /// Every allowed provider failed or returned stale data
    Failed(String),
    /// No provider was available to try
    Deferred,
    /// The run budget ran out first
    Skipped,
}

/// Merged result of an ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Bars per resolved symbol, chronological
    pub bars: BTreeMap<String, Vec<PriceBar>>,
    /// Unresolved symbols and why
    pub unresolved: BTreeMap<String, Unresolved>,
    /// Provider that served each resolved symbol
    pub served_by: BTreeMap<String, &'static str>,
    pub batches: usize,
    pub budget_exhausted: bool,
}

impl IngestOutcome {
    pub fn failed(&self) -> impl Iterator<Item = (&String, &String)> {
        self.unresolved.iter().filter_map(|(s, u)| match u {
            Unresolved::Failed(reason) => Some((s, reason)),
            _ => None,
        })
    }

    pub fn deferred(&self) -> Vec<String> {
        self.symbols_where(|u| matches!(u, Unresolved::Deferred))
    }

    pub fn skipped(&self) -> Vec<String> {
        self.symbols_where(|u| matches!(u, Unresolved::Skipped))
    }

    fn symbols_where(&self, pred: impl Fn(&Unresolved) -> bool) -> Vec<String> {
        self.unresolved
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(s, _)| s.clone())
            .collect()
    }

    fn absorb(&mut self, batch: IngestOutcome) {
        self.bars.extend(batch.bars);
        self.unresolved.extend(batch.unresolved);
        self.served_by.extend(batch.served_by);
        self.batches += batch.batches;
        self.budget_exhausted |= batch.budget_exhausted;
    }
}

// ============================================================================
// Batch Ingestor
// ============================================================================

/// Drives batches of symbols through the provider router.
pub struct BatchIngestor {
    router: Arc<ProviderRouter>,
    config: IngestConfig,
}

impl BatchIngestor {
    pub fn new(router: Arc<ProviderRouter>, config: IngestConfig) -> Self {
        Self { router, config }
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.config.calendar
    }

    /// Number of batches `n` symbols are split into
    pub fn batch_count(&self, n: usize) -> usize {
        n.div_ceil(self.config.max_batch_size)
    }

    /// Fetch bars for `symbols` over `range`.
    ///
    /// Never fails as a whole: every symbol ends up either in `bars` or in
    /// `unresolved`.
    pub async fn ingest(
        &self,
        symbols: &[String],
        range: DateRange,
        budget: &RunBudget,
    ) -> IngestOutcome {
        let target = self.config.calendar.latest_trading_day(range.end);
        let batches: Vec<Vec<String>> = symbols
            .chunks(self.config.max_batch_size)
            .map(|c| c.to_vec())
            .collect();

        info!(
            symbols = symbols.len(),
            batches = batches.len(),
            workers = self.config.worker_count,
            target = %target,
            "Starting batch ingestion"
        );

        let results: Vec<IngestOutcome> = stream::iter(batches)
            .map(|batch| self.ingest_batch(batch, range, target, budget))
            .buffer_unordered(self.config.worker_count)
            .collect()
            .await;

        let mut outcome = IngestOutcome::default();
        for batch in results {
            outcome.absorb(batch);
        }

        info!(
            resolved = outcome.bars.len(),
            failed = outcome.failed().count(),
            deferred = outcome.deferred().len(),
            skipped = outcome.skipped().len(),
            budget_exhausted = outcome.budget_exhausted,
            "Batch ingestion finished"
        );
        outcome
    }

    async fn ingest_batch(
        &self,
        batch: Vec<String>,
        range: DateRange,
        target: NaiveDate,
        budget: &RunBudget,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome {
            batches: 1,
            ..Default::default()
        };
        let mut pending = batch;
        let mut tried: Vec<&'static str> = Vec::new();
        let mut last_error: BTreeMap<String, String> = BTreeMap::new();

        while !pending.is_empty() && (tried.len() as u32) < self.config.max_attempts {
            let routed = match self.router.fetch(&pending, range, &tried, budget).await {
                Ok(routed) => routed,
                Err(RouteError::BudgetExhausted) => {
                    outcome.budget_exhausted = true;
                    break;
                }
                Err(RouteError::ProvidersUnavailable { .. }) => {
                    debug!(pending = pending.len(), ?tried, "No further provider for batch");
                    if tried.is_empty() {
                        for symbol in pending.drain(..) {
                            outcome.unresolved.insert(symbol, Unresolved::Deferred);
                        }
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Routing failed for batch");
                    for symbol in &pending {
                        last_error.insert(symbol.clone(), e.to_string());
                    }
                    break;
                }
            };

            let provider = routed.provider;
            tried.push(provider);
            let mut result = routed.result;
            let mut still_pending = Vec::new();

            for symbol in pending {
                if result.has_bar_on(&symbol, target) {
                    if let Some(bars) = result.bars.remove(&symbol) {
                        outcome.served_by.insert(symbol.clone(), provider);
                        outcome.bars.insert(symbol, bars);
                    }
                } else if let Some(bars) = result.bars.get(&symbol) {
                    let latest = bars.last().map(|b| b.date.to_string()).unwrap_or_default();
                    debug!(symbol = %symbol, provider, latest = %latest, "Stale data, rotating");
                    last_error.insert(
                        symbol.clone(),
                        format!("{}: stale data (latest {}, expected {})", provider, latest, target),
                    );
                    still_pending.push(symbol);
                } else if let Some(error) = result.errors.get(&symbol) {
                    last_error.insert(symbol.clone(), format!("{}: {}", provider, error));
                    still_pending.push(symbol);
                } else {
                    // never requested: the budget ran out mid-batch
                    outcome.unresolved.insert(symbol, Unresolved::Skipped);
                }
            }
            pending = still_pending;

            if routed.budget_exhausted {
                outcome.budget_exhausted = true;
                break;
            }
        }

        let attempts_left = (tried.len() as u32) < self.config.max_attempts;
        for symbol in pending {
            // cut short by the budget rather than by failures
            let status = if outcome.budget_exhausted
                && (attempts_left || !last_error.contains_key(&symbol))
            {
                Unresolved::Skipped
            } else {
                let reason = last_error
                    .remove(&symbol)
                    .unwrap_or_else(|| "no provider could serve symbol".to_string());
                Unresolved::Failed(reason)
            };
            if let Unresolved::Failed(reason) = &status {
                warn!(symbol = %symbol, attempts = tried.len(), reason = %reason, "Symbol failed for this run");
            }
            outcome.unresolved.insert(symbol, status);
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{MarketDataProvider, PartialResult, ProviderCapabilities, ProviderError};
    use crate::data::quota::QuotaPolicy;
    use crate::data::router::RouterConfig;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves every symbol except `missing`; `stale` symbols get a bar one
    /// day short of the range end.
    struct ScriptedProvider {
        name: &'static str,
        priority: u8,
        missing: HashSet<String>,
        stale: HashSet<String>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, priority: u8) -> Self {
            Self {
                name,
                priority,
                missing: HashSet::new(),
                stale: HashSet::new(),
                calls: AtomicU32::new(0),
            }
        }

        fn missing(mut self, symbols: &[&str]) -> Self {
            self.missing = symbols.iter().map(|s| s.to_string()).collect();
            self
        }

        fn stale(mut self, symbols: &[&str]) -> Self {
            self.stale = symbols.iter().map(|s| s.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::multi_symbol(50)
        }

        async fn fetch_batch(
            &self,
            symbols: &[String],
            range: DateRange,
        ) -> Result<PartialResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = PartialResult::new();
            for symbol in symbols {
                if self.missing.contains(symbol) {
                    result.fail(symbol, ProviderError::SymbolNotFound(symbol.clone()));
                    continue;
                }
                let date = if self.stale.contains(symbol) {
                    range.end - chrono::Duration::days(1)
                } else {
                    range.end
                };
                result.insert_bars(
                    symbol,
                    vec![PriceBar {
                        symbol: symbol.clone(),
                        date,
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume: 1.0,
                    }],
                );
            }
            Ok(result)
        }
    }

    fn ingestor(providers: Vec<Arc<ScriptedProvider>>, config: IngestConfig) -> BatchIngestor {
        let mut router = ProviderRouter::new(RouterConfig::default());
        for p in providers {
            router.register(p, QuotaPolicy::new(1000, 1000));
        }
        BatchIngestor::new(Arc::new(router), config)
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{:02}", i)).collect()
    }

    // 2024-03-11 is a Monday
    fn range() -> DateRange {
        DateRange::ending(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(), 10)
    }

    fn config(batch: usize) -> IngestConfig {
        IngestConfig {
            max_batch_size: batch,
            max_attempts: 3,
            worker_count: 2,
            calendar: TradingCalendar::default(),
        }
    }

    #[tokio::test]
    async fn test_batches_are_ceil_of_symbols() {
        let a = Arc::new(ScriptedProvider::new("a", 1));
        let ingestor = ingestor(vec![a.clone()], config(4));
        assert_eq!(ingestor.batch_count(10), 3);

        let outcome = ingestor.ingest(&symbols(10), range(), &RunBudget::new(100)).await;
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.bars.len(), 10);
        assert_eq!(a.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_symbols_fail_over() {
        let a = Arc::new(ScriptedProvider::new("a", 1).missing(&["S01", "S03"]));
        let b = Arc::new(ScriptedProvider::new("b", 2));
        let ingestor = ingestor(vec![a, b], config(5));

        let outcome = ingestor.ingest(&symbols(5), range(), &RunBudget::new(100)).await;
        assert_eq!(outcome.bars.len(), 5);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.served_by["S01"], "b");
        assert_eq!(outcome.served_by["S00"], "a");
    }

    #[tokio::test]
    async fn test_stale_data_is_unresolved() {
        let a = Arc::new(ScriptedProvider::new("a", 1).stale(&["S00"]));
        let b = Arc::new(ScriptedProvider::new("b", 2).stale(&["S00"]));
        let ingestor = ingestor(vec![a, b], config(5));

        let outcome = ingestor.ingest(&symbols(2), range(), &RunBudget::new(100)).await;
        assert_eq!(outcome.bars.len(), 1);
        match &outcome.unresolved["S00"] {
            Unresolved::Failed(reason) => assert!(reason.contains("stale")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let providers: Vec<_> = (0..4u8)
            .map(|i| {
                let name: &'static str = ["p0", "p1", "p2", "p3"][i as usize];
                let p = ScriptedProvider::new(name, i + 1);
                Arc::new(if i < 3 { p.missing(&["S00"]) } else { p })
            })
            .collect();
        let last = providers[3].clone();
        let ingestor = ingestor(providers, config(5));

        let outcome = ingestor.ingest(&symbols(1), range(), &RunBudget::new(100)).await;
        assert!(matches!(outcome.unresolved["S00"], Unresolved::Failed(_)));
        assert_eq!(last.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_providers_defers() {
        let ingestor = ingestor(Vec::new(), config(5));
        let outcome = ingestor.ingest(&symbols(3), range(), &RunBudget::new(100)).await;
        assert_eq!(outcome.deferred().len(), 3);
        assert!(outcome.bars.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_skips() {
        let a = Arc::new(ScriptedProvider::new("a", 1));
        let ingestor = ingestor(
            vec![a],
            IngestConfig {
                max_batch_size: 2,
                max_attempts: 3,
                worker_count: 1,
                calendar: TradingCalendar::default(),
            },
        );

        let outcome = ingestor.ingest(&symbols(6), range(), &RunBudget::new(2)).await;
        assert_eq!(outcome.bars.len(), 4);
        assert_eq!(outcome.skipped().len(), 2);
        assert!(outcome.budget_exhausted);
    }

    #[tokio::test]
    async fn test_weekend_range_targets_friday() {
        let a = Arc::new(ScriptedProvider::new("a", 1));
        let ingestor = ingestor(vec![a], config(5));
        // Saturday 2024-03-09: the provider's bar dated Saturday does not
        // count, so the symbol stays unresolved
        let range = DateRange::ending(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), 5);
        let outcome = ingestor.ingest(&symbols(1), range, &RunBudget::new(10)).await;
        assert!(outcome.bars.is_empty());
    }

    #[tokio::test]
    async fn test_holiday_targets_previous_session() {
        // 2024-07-04 is a Thursday holiday: providers only have 07-03
        let holiday = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let range = DateRange::ending(holiday, 10);
        let universe = symbols(3);
        let all: Vec<&str> = universe.iter().map(String::as_str).collect();

        let a = Arc::new(ScriptedProvider::new("a", 1).stale(&all));
        let closed = IngestConfig {
            calendar: TradingCalendar::new([holiday]),
            ..config(5)
        };
        let outcome = ingestor(vec![a.clone()], closed)
            .ingest(&universe, range, &RunBudget::new(10))
            .await;
        assert_eq!(outcome.bars.len(), 3);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);

        // without the holiday every symbol looks stale
        let b = Arc::new(ScriptedProvider::new("b", 1).stale(&all));
        let outcome = ingestor(vec![b], config(5))
            .ingest(&universe, range, &RunBudget::new(10))
            .await;
        assert!(outcome.bars.is_empty());
        assert_eq!(outcome.failed().count(), 3);
    }
}
