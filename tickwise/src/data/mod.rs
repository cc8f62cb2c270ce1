//! Market data layer.
//!
//! Provides:
//! - `PriceBar` / `DateRange` domain types
//! - `MarketDataProvider` trait and the HTTP adapters (Yahoo, FMP, Alpha Vantage)
//! - Per-provider quota tracking and the run-wide call budget
//! - `ProviderRouter` with circuit-breaker based failover

pub mod alphavantage;
pub mod budget;
pub mod fmp;
pub mod provider;
pub mod quota;
pub mod router;
pub mod yahoo;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tickwise_common::{Config, IngestionSettings, ProviderKind, ProviderSettings};

pub use alphavantage::AlphaVantageAdapter;
pub use budget::RunBudget;
pub use fmp::FmpAdapter;
pub use provider::{
    MarketDataProvider, PartialResult, ProviderCapabilities, ProviderError,
};
pub use quota::{Clock, QuotaError, QuotaPolicy, QuotaSnapshot, QuotaTracker, SystemClock};
pub use router::{FailureRecord, ProviderRouter, RouteError, RouterConfig};
pub use yahoo::YahooChartAdapter;

// ============================================================================
// Price Bar
// ============================================================================

/// One trading day of OHLCV data for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Whether all four prices are finite and strictly positive
    pub fn has_valid_prices(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
    }

    /// OHLC containment: high bounds every price from above, low from below
    pub fn is_consistent(&self) -> bool {
        self.has_valid_prices()
            && self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Multiply all four prices by `factor`; volume is left alone.
    pub fn rescale(&mut self, factor: f64) {
        self.open *= factor;
        self.high *= factor;
        self.low *= factor;
        self.close *= factor;
    }
}

// ============================================================================
// Date Range
// ============================================================================

/// Inclusive range of calendar dates requested from providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `days` calendar days ending at (and including) `end`
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

// ============================================================================
// Trading Calendar
// ============================================================================

/// Weekdays minus configured exchange holidays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    /// Latest trading day on or before `date`.
    pub fn latest_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while !self.is_trading_day(day) {
            match day.pred_opt() {
                Some(previous) => day = previous,
                None => break,
            }
        }
        day
    }
}

impl From<&IngestionSettings> for TradingCalendar {
    fn from(settings: &IngestionSettings) -> Self {
        Self::new(settings.holidays.iter().copied())
    }
}

// ============================================================================
// Provider Construction
// ============================================================================

/// Build one adapter per enabled provider in the configuration.
///
/// Providers that need a credential but have none are skipped with a warning.
pub fn build_providers(config: &Config) -> Vec<(Arc<dyn MarketDataProvider>, QuotaPolicy)> {
    config
        .enabled_providers()
        .into_iter()
        .filter_map(|settings| {
            let provider = build_provider(settings)?;
            Some((provider, QuotaPolicy::from_settings(settings)))
        })
        .collect()
}

fn build_provider(settings: &ProviderSettings) -> Option<Arc<dyn MarketDataProvider>> {
    if settings.kind.requires_api_key() && settings.api_key.is_none() {
        tracing::warn!(
            provider = %settings.kind,
            env = settings.kind.api_key_env(),
            "Provider enabled without API key, skipping"
        );
        return None;
    }

    let provider: Arc<dyn MarketDataProvider> = match settings.kind {
        ProviderKind::Yahoo => Arc::new(YahooChartAdapter::from_settings(settings)),
        ProviderKind::Fmp => Arc::new(FmpAdapter::from_settings(settings)),
        ProviderKind::AlphaVantage => Arc::new(AlphaVantageAdapter::from_settings(settings)),
    };
    Some(provider)
}

/// Shared HTTP client builder for the adapters.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .user_agent(concat!("tickwise/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ============================================================================
// Tests
// ============================================================================
