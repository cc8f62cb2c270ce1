//! Financial Modeling Prep historical price adapter.
//!
//! Accepts several comma-separated symbols per request. A multi-symbol
//! answer is wrapped in `historicalStockList`; a single-symbol answer is
//! the bare `{symbol, historical}` object; an unknown symbol yields `{}`.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tickwise_common::ProviderSettings;
use tracing::debug;

use super::provider::{MarketDataProvider, PartialResult, ProviderCapabilities, ProviderError};
use super::{http_client, DateRange, PriceBar};

const DEFAULT_BATCH: usize = 5;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoricalResponse {
    Multi {
        #[serde(rename = "historicalStockList")]
        historical_stock_list: Vec<SymbolHistory>,
    },
    Single(SymbolHistory),
    Error {
        #[serde(rename = "Error Message")]
        error_message: String,
    },
    Empty {},
}

#[derive(Debug, Deserialize)]
struct SymbolHistory {
    symbol: String,
    #[serde(default)]
    historical: Vec<HistoricalBar>,
}

#[derive(Debug, Deserialize)]
struct HistoricalBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

// ============================================================================
// FMP Adapter
// ============================================================================

/// Financial Modeling Prep adapter.
pub struct FmpAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    priority: u8,
    max_batch_size: usize,
}

impl FmpAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, priority: u8) -> Self {
        Self {
            client: http_client(20),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            priority,
            max_batch_size: DEFAULT_BATCH,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            priority: settings.priority,
            max_batch_size: settings.max_batch_size.max(1),
        }
    }

    /// Override the symbols-per-request limit
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }
}

/// Normalise a historical payload, filing every requested symbol under
/// either bars or an error.
fn parse_historical(
    requested: &[String],
    body: &str,
    range: DateRange,
) -> Result<PartialResult, ProviderError> {
    let response: HistoricalResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("historical-price-full: {}", e)))?;

    let histories = match response {
        HistoricalResponse::Multi {
            historical_stock_list,
        } => historical_stock_list,
        HistoricalResponse::Single(history) => vec![history],
        HistoricalResponse::Error { error_message } => {
            let lowered = error_message.to_lowercase();
            return Err(if lowered.contains("api key") || lowered.contains("apikey") {
                ProviderError::Auth(error_message)
            } else if lowered.contains("limit") {
                ProviderError::RateLimited {
                    retry_after_secs: None,
                }
            } else {
                ProviderError::Unavailable(error_message)
            });
        }
        HistoricalResponse::Empty {} => Vec::new(),
    };

    let mut result = PartialResult::new();
    for history in histories {
        if !requested.contains(&history.symbol) {
            continue;
        }
        let bars = history
            .historical
            .into_iter()
            .filter(|h| range.contains(h.date))
            .map(|h| PriceBar {
                symbol: history.symbol.clone(),
                date: h.date,
                open: h.open,
                high: h.high,
                low: h.low,
                close: h.close,
                volume: h.volume,
            })
            .collect();
        result.insert_bars(&history.symbol, bars);
    }

    for symbol in requested {
        if !result.bars.contains_key(symbol) && !result.errors.contains_key(symbol) {
            result.fail(symbol, ProviderError::SymbolNotFound(symbol.clone()));
        }
    }

    Ok(result)
}

#[async_trait]
impl MarketDataProvider for FmpAdapter {
    fn name(&self) -> &'static str {
        "fmp"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::multi_symbol(self.max_batch_size)
    }

    async fn fetch_batch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<PartialResult, ProviderError> {
        if symbols.is_empty() {
            return Ok(PartialResult::new());
        }

        let url = format!(
            "{}/api/v3/historical-price-full/{}",
            self.base_url,
            symbols.join(",")
        );
        debug!(symbols = symbols.len(), %url, "Fetching historical prices from FMP");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("from", range.start.to_string()),
                ("to", range.end.to_string()),
                ("apikey", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_historical(symbols, &body, range)
    }
}

// ============================================================================
// Tests
// ============================================================================
