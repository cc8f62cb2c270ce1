//! Provider router with circuit-breaker failover.
//!
//! Providers are kept in fixed priority order. For each request the router
//! picks the first provider that is enabled, not tripped, not already tried
//! for this request and still has quota for today. Every call consumes one
//! unit of the run budget, one unit of the provider's quota, runs under a
//! timeout and reports its outcome to the provider's breaker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tickwise_common::Config;
use tracing::{debug, info, warn};

use super::budget::RunBudget;
use super::provider::{MarketDataProvider, PartialResult, ProviderError};
use super::quota::{Clock, QuotaError, QuotaPolicy, QuotaSnapshot, QuotaTracker, SystemClock};
use super::DateRange;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

// ============================================================================
// Router Configuration
// ============================================================================

/// Configuration for the provider router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Consecutive failures before a provider's circuit opens
    pub failure_threshold: u32,
    /// Time a tripped provider is skipped
    pub cooldown: Duration,
    /// Per-call timeout used when a provider registers without its own
    pub call_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl RouterConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.circuit_breaker.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.circuit_breaker.cooldown_secs),
            ..Default::default()
        }
    }

    fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig::with_name(name)
            .failure_threshold(self.failure_threshold)
            .cooldown(self.cooldown)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Routing failures.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// The chosen provider's daily quota ran out
    #[error("Daily quota exhausted for {provider}")]
    QuotaExhausted { provider: String },

    /// No provider is enabled, closed, untried and within quota
    #[error("No provider available for {symbols} symbol(s)")]
    ProvidersUnavailable { symbols: usize },

    /// The run's call budget is spent
    #[error("Run call budget exhausted")]
    BudgetExhausted,

    /// The provider call itself failed
    #[error("{provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

// ============================================================================
// Failure Log
// ============================================================================

/// One failed provider call.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub provider: String,
    pub symbols: Vec<String>,
    pub error_kind: String,
    pub error: String,
    /// 1-based provider attempt for these symbols
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Routed Result
// ============================================================================

/// Result of routing one request to one provider.
#[derive(Debug, Clone)]
pub struct RoutedBatch {
    /// Provider that served the request
    pub provider: &'static str,
    /// Bars and per-symbol errors. Symbols never requested because the
    /// budget ran out appear in neither map.
    pub result: PartialResult,
    /// The budget ran out before every symbol was requested
    pub budget_exhausted: bool,
}

/// Provider state for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: u8,
    pub enabled: bool,
    pub circuit: CircuitBreakerStats,
    pub quota: Option<QuotaSnapshot>,
}

// ============================================================================
// Provider Entry
// ============================================================================

struct ProviderEntry {
    provider: Arc<dyn MarketDataProvider>,
    breaker: CircuitBreaker,
    timeout: Duration,
    enabled: bool,
}

impl ProviderEntry {
    fn name(&self) -> &'static str {
        self.provider.name()
    }
}

// ============================================================================
// Provider Router
// ============================================================================

/// Routes bar requests across providers with failover.
pub struct ProviderRouter {
    entries: Vec<ProviderEntry>,
    quotas: QuotaTracker,
    failures: Mutex<Vec<FailureRecord>>,
    config: RouterConfig,
}

impl ProviderRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Router whose quota day boundaries follow `clock`
    pub fn with_clock(config: RouterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            quotas: QuotaTracker::new(clock),
            failures: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Router with every usable provider from the configuration, each with
    /// its configured quota and call timeout.
    pub fn from_config(config: &Config) -> Self {
        let mut router = Self::new(RouterConfig::from_config(config));
        for (provider, policy) in super::build_providers(config) {
            let timeout = config
                .providers
                .iter()
                .find(|p| p.kind.as_str() == provider.name())
                .map(|p| Duration::from_secs(p.timeout_secs.max(1)))
                .unwrap_or(router.config.call_timeout);
            router.register_with_timeout(provider, policy, timeout);
        }
        if router.entries.is_empty() {
            warn!("No market data provider could be built from configuration");
        }
        router
    }

    /// Register a provider; entries stay sorted by priority.
    pub fn register(&mut self, provider: Arc<dyn MarketDataProvider>, policy: QuotaPolicy) {
        let timeout = self.config.call_timeout;
        self.register_with_timeout(provider, policy, timeout);
    }

    /// Register a provider with its own call timeout.
    pub fn register_with_timeout(
        &mut self,
        provider: Arc<dyn MarketDataProvider>,
        policy: QuotaPolicy,
        timeout: Duration,
    ) {
        let name = provider.name();
        let priority = provider.priority();

        self.quotas.register(name, policy);
        self.entries.retain(|e| e.name() != name);
        self.entries.push(ProviderEntry {
            breaker: CircuitBreaker::new(self.config.breaker_config(name)),
            provider,
            timeout,
            enabled: true,
        });
        // stable: equal priorities keep registration order
        self.entries.sort_by_key(|e| e.provider.priority());

        info!(
            provider = name,
            priority,
            rpm = policy.requests_per_minute,
            rpd = policy.requests_per_day,
            "Registered market data provider"
        );
    }

    /// Enable or disable a provider
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name() == name) {
            entry.enabled = enabled;
            info!(provider = name, enabled, "Provider enabled status changed");
        }
    }

    /// Registered provider names in routing order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn provider_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether any provider could take a request right now
    pub async fn any_available(&self) -> bool {
        for entry in &self.entries {
            if entry.enabled
                && !entry.breaker.is_open()
                && self.quotas.has_headroom(entry.name()).await
            {
                return true;
            }
        }
        false
    }

    /// Fetch `symbols` from the best provider not in `tried`.
    ///
    /// The chosen provider is called once per chunk of its batch capacity
    /// (single-symbol providers once per symbol, paced by their quota).
    /// Returns `ProvidersUnavailable` when nothing qualifies and
    /// `BudgetExhausted` when not even the first call could be paid for.
    pub async fn fetch(
        &self,
        symbols: &[String],
        range: DateRange,
        tried: &[&'static str],
        budget: &RunBudget,
    ) -> Result<RoutedBatch, RouteError> {
        let attempt = tried.len() as u32 + 1;
        let mut skipped: Vec<&'static str> = Vec::new();

        loop {
            if budget.is_exhausted() {
                return Err(RouteError::BudgetExhausted);
            }

            let Some(entry) = self.select(tried, &skipped).await else {
                debug!(symbols = symbols.len(), ?tried, "No provider available");
                return Err(RouteError::ProvidersUnavailable {
                    symbols: symbols.len(),
                });
            };

            match self
                .fetch_from(entry, symbols, range, budget, attempt)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(RouteError::QuotaExhausted { provider }) => {
                    debug!(provider = %provider, "Quota exhausted during selection, rotating");
                    skipped.push(entry.name());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain the failure log
    pub fn take_failures(&self) -> Vec<FailureRecord> {
        match self.failures.lock() {
            Ok(mut failures) => std::mem::take(&mut *failures),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Copy of the failure log
    pub fn failures(&self) -> Vec<FailureRecord> {
        match self.failures.lock() {
            Ok(failures) => failures.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Breaker and quota state per provider
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            statuses.push(ProviderStatus {
                name: entry.name().to_string(),
                priority: entry.provider.priority(),
                enabled: entry.enabled,
                circuit: entry.breaker.stats(),
                quota: self.quotas.snapshot(entry.name()).await,
            });
        }
        statuses
    }

    // ========================================================================
    // Private Methods
    // ========================================================================

    /// First eligible provider; claims a breaker permit on the one returned.
    async fn select(
        &self,
        tried: &[&'static str],
        skipped: &[&'static str],
    ) -> Option<&ProviderEntry> {
        for entry in &self.entries {
            let name = entry.name();
            if !entry.enabled || tried.contains(&name) || skipped.contains(&name) {
                continue;
            }
            if entry.breaker.is_open() {
                debug!(provider = name, "Skipping provider with open circuit");
                continue;
            }
            if !self.quotas.has_headroom(name).await {
                debug!(provider = name, "Skipping provider without quota");
                continue;
            }
            if entry.breaker.try_acquire() {
                return Some(entry);
            }
        }
        None
    }

    /// Serve every symbol from one provider. The caller holds the breaker
    /// permit for the first chunk.
    async fn fetch_from(
        &self,
        entry: &ProviderEntry,
        symbols: &[String],
        range: DateRange,
        budget: &RunBudget,
        attempt: u32,
    ) -> Result<RoutedBatch, RouteError> {
        let name = entry.name();
        let chunk_size = entry.provider.capabilities().chunk_size();
        let mut result = PartialResult::new();
        let mut budget_exhausted = false;
        let mut issued = 0usize;

        let chunks: Vec<&[String]> = symbols.chunks(chunk_size).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !entry.breaker.try_acquire() {
                let rest = chunks[index..].iter().flat_map(|c| c.iter());
                for symbol in rest {
                    result.fail(symbol, ProviderError::Unavailable("circuit open".into()));
                }
                break;
            }

            match self.call(entry, chunk, range, budget, attempt).await {
                Ok(part) => {
                    issued += 1;
                    for symbol in chunk.iter() {
                        if !part.bars.contains_key(symbol) && !part.errors.contains_key(symbol) {
                            result.fail(symbol, ProviderError::SymbolNotFound(symbol.clone()));
                        }
                    }
                    result.merge(part);
                }
                Err(RouteError::Provider { source, .. }) => {
                    issued += 1;
                    for symbol in chunk.iter() {
                        result.fail(symbol, source.clone());
                    }
                }
                Err(RouteError::BudgetExhausted) if issued > 0 => {
                    entry.breaker.release();
                    budget_exhausted = true;
                    break;
                }
                Err(RouteError::QuotaExhausted { .. }) if issued > 0 => {
                    entry.breaker.release();
                    let rest = chunks[index..].iter().flat_map(|c| c.iter());
                    for symbol in rest {
                        result.fail(
                            symbol,
                            ProviderError::RateLimited {
                                retry_after_secs: None,
                            },
                        );
                    }
                    break;
                }
                Err(e) => {
                    entry.breaker.release();
                    return Err(e);
                }
            }
        }

        debug!(
            provider = name,
            requested = symbols.len(),
            served = result.bars.len(),
            calls = issued,
            "Provider batch finished"
        );

        Ok(RoutedBatch {
            provider: name,
            result,
            budget_exhausted,
        })
    }

    /// One metered, timed call.
    async fn call(
        &self,
        entry: &ProviderEntry,
        symbols: &[String],
        range: DateRange,
        budget: &RunBudget,
        attempt: u32,
    ) -> Result<PartialResult, RouteError> {
        let name = entry.name();

        if budget.is_exhausted() {
            return Err(RouteError::BudgetExhausted);
        }

        self.quotas.acquire(name).await.map_err(|e| match e {
            QuotaError::Exhausted { provider, .. } => RouteError::QuotaExhausted { provider },
            QuotaError::UnknownProvider(provider) => RouteError::QuotaExhausted { provider },
        })?;

        if !budget.try_consume() {
            return Err(RouteError::BudgetExhausted);
        }

        let outcome = match tokio::time::timeout(
            entry.timeout,
            entry.provider.fetch_batch(symbols, range),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(entry.timeout)),
        };

        match outcome {
            Ok(part) => {
                entry.breaker.record_success();
                Ok(part)
            }
            Err(error) => {
                entry.breaker.record_failure();
                warn!(
                    provider = name,
                    symbols = symbols.len(),
                    attempt,
                    error = %error,
                    "Provider call failed"
                );
                self.record_failure(FailureRecord {
                    provider: name.to_string(),
                    symbols: symbols.to_vec(),
                    error_kind: error.kind().to_string(),
                    error: error.to_string(),
                    attempt,
                    at: Utc::now(),
                });
                Err(RouteError::Provider {
                    provider: name.to_string(),
                    source: error,
                })
            }
        }
    }

    fn record_failure(&self, record: FailureRecord) {
        match self.failures.lock() {
            Ok(mut failures) => failures.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::ProviderCapabilities;
    use crate::data::PriceBar;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockProvider {
        name: &'static str,
        priority: u8,
        capabilities: ProviderCapabilities,
        fail_all: bool,
        fail_symbols: HashSet<String>,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn new(name: &'static str, priority: u8) -> Self {
            Self {
                name,
                priority,
                capabilities: ProviderCapabilities::multi_symbol(10),
                fail_all: false,
                fail_symbols: HashSet::new(),
                delay: None,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(mut self) -> Self {
            self.fail_all = true;
            self
        }

        fn single(mut self) -> Self {
            self.capabilities = ProviderCapabilities::single_symbol();
            self
        }

        fn failing_for(mut self, symbols: &[&str]) -> Self {
            self.fail_symbols = symbols.iter().map(|s| s.to_string()).collect();
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.capabilities
        }

        async fn fetch_batch(
            &self,
            symbols: &[String],
            range: DateRange,
        ) -> Result<PartialResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_all || symbols.iter().any(|s| self.fail_symbols.contains(s)) {
                return Err(ProviderError::Unavailable("mock failure".into()));
            }
            let mut result = PartialResult::new();
            for symbol in symbols {
                result.insert_bars(
                    symbol,
                    vec![PriceBar {
                        symbol: symbol.clone(),
                        date: range.end,
                        open: 10.0,
                        high: 11.0,
                        low: 9.0,
                        close: 10.5,
                        volume: 100.0,
                    }],
                );
            }
            Ok(result)
        }
    }

    fn range() -> DateRange {
        DateRange::ending(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(), 5)
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn router(providers: Vec<Arc<MockProvider>>) -> ProviderRouter {
        let mut router = ProviderRouter::new(RouterConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
            call_timeout: Duration::from_millis(200),
        });
        for p in providers {
            router.register(p, QuotaPolicy::new(1000, 1000));
        }
        router
    }

    #[tokio::test]
    async fn test_priority_order() {
        let a = Arc::new(MockProvider::new("a", 2));
        let b = Arc::new(MockProvider::new("b", 1));
        let router = router(vec![a.clone(), b.clone()]);
        assert_eq!(router.provider_names(), vec!["b", "a"]);

        let budget = RunBudget::new(10);
        let batch = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(batch.provider, "b");
        assert_eq!(b.calls(), 1);
        assert_eq!(a.calls(), 0);
        assert_eq!(budget.used(), 1);
    }

    #[tokio::test]
    async fn test_tried_providers_are_skipped() {
        let a = Arc::new(MockProvider::new("a", 1));
        let b = Arc::new(MockProvider::new("b", 2));
        let router = router(vec![a.clone(), b.clone()]);

        let budget = RunBudget::new(10);
        let batch = router
            .fetch(&symbols(&["AAPL"]), range(), &["a"], &budget)
            .await
            .unwrap();
        assert_eq!(batch.provider, "b");
        assert_eq!(a.calls(), 0);

        let err = router
            .fetch(&symbols(&["AAPL"]), range(), &["a", "b"], &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::ProvidersUnavailable { symbols: 1 }));
    }

    #[tokio::test]
    async fn test_failure_recorded_and_breaker_opens() {
        let a = Arc::new(MockProvider::new("a", 1).failing());
        let b = Arc::new(MockProvider::new("b", 2));
        let router = router(vec![a.clone(), b.clone()]);
        let budget = RunBudget::new(10);

        for _ in 0..2 {
            let batch = router
                .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
                .await
                .unwrap();
            assert_eq!(batch.provider, "a");
            assert!(batch.result.errors.contains_key("AAPL"));
        }

        // circuit for "a" is now open
        let batch = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(batch.provider, "b");
        assert_eq!(a.calls(), 2);

        let failures = router.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].provider, "a");
        assert_eq!(failures[0].error_kind, "unavailable");
    }

    #[tokio::test]
    async fn test_single_symbol_provider_is_looped() {
        let a = Arc::new(MockProvider::new("a", 1).single().failing_for(&["MSFT"]));
        let router = router(vec![a.clone()]);
        let budget = RunBudget::new(10);

        let batch = router
            .fetch(&symbols(&["AAPL", "MSFT", "GOOG"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(a.calls(), 3);
        assert_eq!(batch.result.bars.len(), 2);
        assert!(batch.result.errors.contains_key("MSFT"));
        assert_eq!(budget.used(), 3);

        let failures = router.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].symbols, vec!["MSFT".to_string()]);
        assert!(router.failures().is_empty());
    }

    #[tokio::test]
    async fn test_quota_exhaustion_rotates() {
        let a = Arc::new(MockProvider::new("a", 1));
        let b = Arc::new(MockProvider::new("b", 2));
        let mut router = ProviderRouter::new(RouterConfig::default());
        router.register(a.clone(), QuotaPolicy::new(10, 1));
        router.register(b.clone(), QuotaPolicy::new(10, 10));
        let budget = RunBudget::new(10);

        let first = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(first.provider, "a");

        let second = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(second.provider, "b");
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let a = Arc::new(MockProvider::new("a", 1).single());
        let router = router(vec![a.clone()]);
        let budget = RunBudget::new(2);

        let batch = router
            .fetch(&symbols(&["AAPL", "MSFT", "GOOG"]), range(), &[], &budget)
            .await
            .unwrap();
        assert!(batch.budget_exhausted);
        assert_eq!(batch.result.bars.len(), 2);
        assert_eq!(a.calls(), 2);

        let err = router
            .fetch(&symbols(&["GOOG"]), range(), &[], &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::BudgetExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let a = Arc::new(MockProvider::new("a", 1).slow(Duration::from_secs(5)));
        let router = router(vec![a.clone()]);
        let budget = RunBudget::new(10);

        let batch = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert!(matches!(
            batch.result.errors.get("AAPL"),
            Some(ProviderError::Timeout(_))
        ));
        assert_eq!(router.failures()[0].error_kind, "timeout");
    }

    #[tokio::test]
    async fn test_disabled_provider_skipped() {
        let a = Arc::new(MockProvider::new("a", 1));
        let b = Arc::new(MockProvider::new("b", 2));
        let mut router = router(vec![a.clone(), b.clone()]);
        router.set_enabled("a", false);

        let budget = RunBudget::new(10);
        let batch = router
            .fetch(&symbols(&["AAPL"]), range(), &[], &budget)
            .await
            .unwrap();
        assert_eq!(batch.provider, "b");

        let status = router.provider_status().await;
        assert_eq!(status.len(), 2);
        assert!(!status[0].enabled);
        assert_eq!(status[1].quota.as_ref().unwrap().calls_today, 1);
    }

    #[test]
    fn test_from_config_uses_configured_providers() {
        let mut config = Config::default_with_providers();
        for p in &mut config.providers {
            p.api_key = Some("k".into());
        }
        config.providers[0].timeout_secs = 7;
        let router = ProviderRouter::from_config(&config);
        assert_eq!(router.provider_names(), vec!["fmp", "yahoo", "alphavantage"]);
        assert_eq!(router.entries[0].timeout, Duration::from_secs(7));
    }
}
