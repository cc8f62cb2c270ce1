//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tickwise::data::provider::{PartialResult, ProviderCapabilities, ProviderError};
use tickwise::data::{DateRange, MarketDataProvider, PriceBar, TradingCalendar};

// ============================================================================
// Mock Provider
// ============================================================================

/// Provider that synthesizes a smooth daily series for every trading day of
/// the requested range, failing the whole call for configured symbols.
pub struct MockProvider {
    name: &'static str,
    priority: u8,
    capabilities: ProviderCapabilities,
    fail_all: bool,
    failing: HashSet<String>,
    calendar: TradingCalendar,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(name: &'static str, priority: u8) -> Self {
        Self {
            name,
            priority,
            capabilities: ProviderCapabilities::single_symbol(),
            fail_all: false,
            failing: HashSet::new(),
            calendar: TradingCalendar::default(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn multi(mut self, max_batch_size: usize) -> Self {
        self.capabilities = ProviderCapabilities::multi_symbol(max_batch_size);
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn failing_for(mut self, symbols: &[String]) -> Self {
        self.failing = symbols.iter().cloned().collect();
        self
    }

    /// No bars on these weekdays
    pub fn closed_on(mut self, holidays: &[NaiveDate]) -> Self {
        self.calendar = TradingCalendar::new(holidays.iter().copied());
        self
    }

    pub fn calls(&self) -> u32 {
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

        if self.fail_all || symbols.iter().any(|s| self.failing.contains(s)) {
            return Err(ProviderError::Unavailable(format!("{} is down", self.name)));
        }

        let mut result = PartialResult::new();
        for symbol in symbols {
            result.insert_bars(symbol, series_on(symbol, range, &self.calendar));
        }
        Ok(result)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Gently oscillating bars on every weekday in `range`.
pub fn series(symbol: &str, range: DateRange) -> Vec<PriceBar> {
    series_on(symbol, range, &TradingCalendar::default())
}

/// Gently oscillating bars on every trading day of `calendar` in `range`.
pub fn series_on(symbol: &str, range: DateRange, calendar: &TradingCalendar) -> Vec<PriceBar> {
    let base = 50.0 + (symbol.len() as f64) * 10.0;
    let mut bars = Vec::new();
    let mut date = range.start;
    while date <= range.end {
        if calendar.is_trading_day(date) {
            let t = date.num_days_from_ce() as f64;
            let close = base * (1.0 + 0.05 * (t / 7.0).sin());
            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date,
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.985,
                close,
                volume: 1_000_000.0,
            });
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    bars
}

pub fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("SYM{:02}", i)).collect()
}

/// 2024-06-07, a Friday
pub fn friday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()
}

/// 2024-06-08, a Saturday
pub fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 8).unwrap()
}

/// 2024-07-04, a Thursday exchange holiday
pub fn independence_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()
}
