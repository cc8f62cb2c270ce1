//! Daily orchestrator.
//!
//! Sequences one run over the active symbol universe:
//!
//! 1. `acquire` - batch ingestion through the provider router
//! 2. `clean` - scale repair and bar validation per symbol
//! 3. `indicators` - latest indicator set per symbol (blocking pool, rayon)
//! 4. `persist` - bars plus indicators, one transaction per symbol
//! 5. optional phases (backfill, ...) while call budget remains
//!
//! A symbol that fails a phase is dropped from the phases after it. Running
//! out of call budget ends the run early with
//! [`RunStatus::CompletedBudgetExhausted`]; it is never an error.

pub mod backfill;
pub mod report;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tickwise_common::Config;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clean::{CleanReport, Cleaner, CleanerConfig};
use crate::data::router::ProviderRouter;
use crate::data::{DateRange, RunBudget};
use crate::indicators::{IndicatorConfig, IndicatorEngine, IndicatorSet};
use crate::ingest::{BatchIngestor, IngestConfig, Unresolved};
use crate::storage::{PersistenceError, PersistenceGateway};

pub use backfill::BackfillPhase;
pub use report::{PhaseReport, RunReport, RunStatus};

pub const PHASE_ACQUIRE: &str = "acquire";
pub const PHASE_CLEAN: &str = "clean";
pub const PHASE_INDICATORS: &str = "indicators";
pub const PHASE_PERSIST: &str = "persist";

// ============================================================================
// Options / Configuration
// ============================================================================

/// Per-run options.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Date the run is for
    pub as_of: NaiveDate,
    /// Run even when `as_of` is not a trading day
    pub force_run: bool,
}

impl RunOptions {
    pub fn today() -> Self {
        Self {
            as_of: Utc::now().date_naive(),
            force_run: false,
        }
    }
}

/// Run-wide orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Calendar days of history requested by the acquire phase
    pub history_days: u32,
    /// Provider calls allowed per run
    pub call_budget: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            history_days: config.ingestion.history_days.max(1),
            call_budget: config.run.call_budget,
        }
    }
}

// ============================================================================
// Optional Phases
// ============================================================================

/// Shared collaborators handed to optional phases.
pub struct PhaseContext<'a> {
    pub as_of: NaiveDate,
    pub budget: &'a RunBudget,
    pub ingestor: &'a BatchIngestor,
    pub cleaner: &'a Cleaner,
    pub engine: &'a Arc<IndicatorEngine>,
    pub store: &'a PersistenceGateway,
    /// Symbols that made it through the core phases
    pub symbols: &'a [String],
}

/// Discretionary work run after the core phases while budget remains.
#[async_trait]
pub trait OptionalPhase: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &PhaseContext<'_>) -> PhaseReport;
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs the daily pipeline.
pub struct DailyOrchestrator {
    ingestor: BatchIngestor,
    cleaner: Cleaner,
    engine: Arc<IndicatorEngine>,
    store: PersistenceGateway,
    config: OrchestratorConfig,
    optional: Vec<Box<dyn OptionalPhase>>,
}

impl DailyOrchestrator {
    pub fn new(
        ingestor: BatchIngestor,
        cleaner: Cleaner,
        engine: IndicatorEngine,
        store: PersistenceGateway,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ingestor,
            cleaner,
            engine: Arc::new(engine),
            store,
            config,
            optional: Vec::new(),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(config: &Config, router: Arc<ProviderRouter>, store: PersistenceGateway) -> Self {
        let ingestor = BatchIngestor::new(router, IngestConfig::from(&config.ingestion));
        let orchestrator = Self::new(
            ingestor,
            Cleaner::new(CleanerConfig::from(&config.cleaner)),
            IndicatorEngine::new(IndicatorConfig::from(&config.indicators)),
            store,
            OrchestratorConfig::from(config),
        );
        if config.run.backfill_enabled {
            orchestrator.with_phase(Box::new(BackfillPhase::from_settings(&config.run)))
        } else {
            orchestrator
        }
    }

    /// Append an optional phase; phases run in the order added.
    pub fn with_phase(mut self, phase: Box<dyn OptionalPhase>) -> Self {
        self.optional.push(phase);
        self
    }

    pub fn store(&self) -> &PersistenceGateway {
        &self.store
    }

    /// Run over the stored active symbols.
    ///
    /// Fails only when the symbol universe cannot be read.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport, PersistenceError> {
        let symbols = self.store.active_symbols().await?;
        Ok(self.run_symbols(options, &symbols).await)
    }

    /// Run over an explicit symbol list.
    pub async fn run_symbols(&self, options: RunOptions, symbols: &[String]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let budget = RunBudget::new(self.config.call_budget);
        let router = self.ingestor.router();

        let mut report = RunReport {
            run_id,
            as_of: options.as_of,
            forced: options.force_run,
            status: RunStatus::Completed,
            started_at,
            finished_at: started_at,
            phases: Vec::new(),
            low_confidence: Vec::new(),
            deferred: Vec::new(),
            budget: budget.summary(),
            providers: Vec::new(),
            failures: Vec::new(),
        };

        if !self.ingestor.calendar().is_trading_day(options.as_of) && !options.force_run {
            info!(run_id = %run_id, as_of = %options.as_of, "Not a trading day, skipping run");
            report.status = RunStatus::SkippedNonTradingDay;
            report.providers = router.provider_status().await;
            report.finished_at = Utc::now();
            return report;
        }

        info!(
            run_id = %run_id,
            as_of = %options.as_of,
            symbols = symbols.len(),
            budget = budget.limit(),
            forced = options.force_run,
            "Starting daily run"
        );

        // 1. acquire
        let range = DateRange::ending(options.as_of, self.config.history_days);
        let mut acquire = PhaseReport::start(PHASE_ACQUIRE);
        let outcome = self.ingestor.ingest(symbols, range, &budget).await;
        for _ in &outcome.bars {
            acquire.succeed();
        }
        for (symbol, unresolved) in &outcome.unresolved {
            match unresolved {
                Unresolved::Failed(reason) => acquire.fail(symbol.clone(), reason.clone()),
                Unresolved::Deferred => {
                    report.deferred.push(symbol.clone());
                    acquire.skip(symbol.clone());
                }
                Unresolved::Skipped => acquire.skip(symbol.clone()),
            }
        }
        acquire.budget_exhausted = outcome.budget_exhausted;
        report.phases.push(acquire.finish());

        // 2. clean
        let mut clean = PhaseReport::start(PHASE_CLEAN);
        let mut cleaned: BTreeMap<String, CleanReport> = BTreeMap::new();
        for (symbol, bars) in outcome.bars {
            let result = self.cleaner.clean(bars);
            if result.bars.is_empty() {
                clean.fail(symbol, "no valid bars after cleaning");
                continue;
            }
            if result.low_confidence {
                report.low_confidence.push(symbol.clone());
            }
            clean.succeed();
            cleaned.insert(symbol, result);
        }
        report.phases.push(clean.finish());

        // 3. indicators
        let mut indicators = PhaseReport::start(PHASE_INDICATORS);
        let (cleaned, sets) = self.compute_indicators(cleaned).await;
        for symbol in cleaned.keys() {
            if sets.contains_key(symbol) {
                indicators.succeed();
            } else {
                indicators.fail(symbol.clone(), "indicator computation failed");
            }
        }
        report.phases.push(indicators.finish());

        // 4. persist
        let mut persist = PhaseReport::start(PHASE_PERSIST);
        let mut persisted = Vec::with_capacity(sets.len());
        for (symbol, set) in &sets {
            let Some(series) = cleaned.get(symbol) else {
                continue;
            };
            match persist_with_retry(&self.store, symbol, series, std::slice::from_ref(set)).await {
                Ok(_) => {
                    persist.succeed();
                    persisted.push(symbol.clone());
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Persisting symbol failed after retry");
                    persist.fail(symbol.clone(), e.to_string());
                }
            }
        }
        report.phases.push(persist.finish());

        // 5. optional phases
        let mut exhausted = report.phases.iter().any(|p| p.budget_exhausted);
        let ctx = PhaseContext {
            as_of: options.as_of,
            budget: &budget,
            ingestor: &self.ingestor,
            cleaner: &self.cleaner,
            engine: &self.engine,
            store: &self.store,
            symbols: &persisted,
        };
        for phase in &self.optional {
            if exhausted || budget.is_exhausted() {
                info!(phase = phase.name(), "Call budget spent, skipping phase");
                let mut skipped = PhaseReport::skipped_entirely(phase.name(), &persisted);
                skipped.budget_exhausted = true;
                exhausted = true;
                report.phases.push(skipped);
                continue;
            }
            let phase_report = phase.run(&ctx).await;
            exhausted |= phase_report.budget_exhausted;
            report.phases.push(phase_report);
        }

        if exhausted {
            report.status = RunStatus::CompletedBudgetExhausted;
        }
        report.budget = budget.summary();
        report.providers = router.provider_status().await;
        report.failures = router.take_failures();
        report.finished_at = Utc::now();

        info!(
            run_id = %run_id,
            status = ?report.status,
            persisted = persisted.len(),
            low_confidence = report.low_confidence.len(),
            deferred = report.deferred.len(),
            calls = report.budget.used,
            provider_failures = report.failures.len(),
            "Daily run finished"
        );
        report
    }

    /// Latest set per symbol on the blocking pool.
    async fn compute_indicators(
        &self,
        cleaned: BTreeMap<String, CleanReport>,
    ) -> (BTreeMap<String, CleanReport>, BTreeMap<String, IndicatorSet>) {
        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || {
            let sets = engine.compute_all(&cleaned);
            (cleaned, sets)
        });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                // the series moved into the task are lost with it
                error!(error = %e, "Indicator task failed");
                (BTreeMap::new(), BTreeMap::new())
            }
        }
    }
}

/// Persist one symbol, retrying once on failure.
pub(crate) async fn persist_with_retry(
    store: &PersistenceGateway,
    symbol: &str,
    series: &CleanReport,
    sets: &[IndicatorSet],
) -> Result<usize, PersistenceError> {
    match store
        .persist_symbol(symbol, &series.bars, series.low_confidence, sets)
        .await
    {
        Ok(count) => Ok(count),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Persist failed, retrying once");
            store
                .persist_symbol(symbol, &series.bars, series.low_confidence, sets)
                .await
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
