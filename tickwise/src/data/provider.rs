//! Market data provider abstraction.
//!
//! Defines the `MarketDataProvider` trait every source implements so the
//! router can rotate between them, plus the error taxonomy shared by the
//! adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use super::{DateRange, PriceBar};

// ============================================================================
// Provider Capabilities
// ============================================================================

/// What a provider can serve in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    /// Accepts several symbols per request
    pub multi_symbol: bool,
    /// Largest number of symbols per request
    pub max_batch_size: usize,
}

impl ProviderCapabilities {
    /// One symbol per request
    pub fn single_symbol() -> Self {
        Self {
            multi_symbol: false,
            max_batch_size: 1,
        }
    }

    /// Up to `max_batch_size` symbols per request
    pub fn multi_symbol(max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            multi_symbol: max_batch_size > 1,
            max_batch_size,
        }
    }

    /// Symbols to send per call
    pub fn chunk_size(&self) -> usize {
        if self.multi_symbol {
            self.max_batch_size.max(1)
        } else {
            1
        }
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised by a provider call.
///
/// Every variant is transient from the pipeline's point of view: it counts
/// against the provider's breaker and the symbol moves on to the next
/// provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Connection failed or transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Credential rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Provider-side throttling
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// 5xx or maintenance
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider has no data for the symbol
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Body could not be parsed
    #[error("Malformed response: {0}")]
    Malformed(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|s| format!(", retry after {} seconds", s))
        .unwrap_or_default()
}

impl ProviderError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("HTTP {}", status)),
            404 => Self::SymbolNotFound(snippet),
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => Self::Unavailable(format!("HTTP {}: {}", status, snippet)),
            _ => Self::Malformed(format!("HTTP {}: {}", status, snippet)),
        }
    }

    /// Map a transport error from reqwest.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network("Request timeout".into())
        } else if err.is_connect() {
            Self::Network("Connection failed".into())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Short stable label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Auth(_) => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::SymbolNotFound(_) => "symbol_not_found",
            Self::Malformed(_) => "malformed",
        }
    }
}

// ============================================================================
// Partial Result
// ============================================================================

/// Outcome of one provider call: bars for the symbols it served and a
/// per-symbol error for the ones it could not.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub bars: BTreeMap<String, Vec<PriceBar>>,
    pub errors: BTreeMap<String, ProviderError>,
}

impl PartialResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bars for a symbol; an empty list is recorded as not found.
    pub fn insert_bars(&mut self, symbol: &str, mut bars: Vec<PriceBar>) {
        if bars.is_empty() {
            self.fail(symbol, ProviderError::SymbolNotFound(symbol.to_string()));
            return;
        }
        bars.sort_by_key(|b| b.date);
        self.errors.remove(symbol);
        self.bars.insert(symbol.to_string(), bars);
    }

    /// Record a per-symbol failure
    pub fn fail(&mut self, symbol: &str, error: ProviderError) {
        self.errors.insert(symbol.to_string(), error);
    }

    /// Fold another result into this one; bars win over errors.
    pub fn merge(&mut self, other: PartialResult) {
        for (symbol, error) in other.errors {
            if !self.bars.contains_key(&symbol) {
                self.errors.insert(symbol, error);
            }
        }
        for (symbol, bars) in other.bars {
            self.errors.remove(&symbol);
            self.bars.insert(symbol, bars);
        }
    }

    /// Whether `symbol` has a bar dated `date`
    pub fn has_bar_on(&self, symbol: &str, date: NaiveDate) -> bool {
        self.bars
            .get(symbol)
            .map(|bars| bars.iter().any(|b| b.date == date))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty() && self.errors.is_empty()
    }
}

// ============================================================================
// Market Data Provider Trait
// ============================================================================

/// A source of daily price bars.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable provider name (e.g. "fmp")
    fn name(&self) -> &'static str;

    /// Routing priority (lower = tried first)
    fn priority(&self) -> u8;

    /// Batch capabilities
    fn capabilities(&self) -> ProviderCapabilities;

    /// Fetch daily bars for `symbols` over `range`.
    ///
    /// `symbols` never exceeds `capabilities().max_batch_size`. Call-level
    /// failures are returned as `Err`; symbols the provider does not know go
    /// into `PartialResult::errors`.
    async fn fetch_batch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<PartialResult, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================
