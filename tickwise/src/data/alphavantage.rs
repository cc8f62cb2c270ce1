//! Alpha Vantage daily time series adapter.
//!
//! One symbol per request. Bars come as a map keyed by date whose values
//! carry string-encoded numbers (`"1. open"`, `"2. high"`, ...). Throttling
//! and bad symbols are reported inside a 200 response via `Note`,
//! `Information` or `Error Message` keys.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tickwise_common::ProviderSettings;
use tracing::debug;

use super::provider::{MarketDataProvider, PartialResult, ProviderCapabilities, ProviderError};
use super::{http_client, DateRange, PriceBar};

/// "compact" returns the latest 100 sessions, roughly 140 calendar days
const COMPACT_CALENDAR_DAYS: i64 = 140;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<BTreeMap<NaiveDate, DailyEntry>>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume", default)]
    volume: Option<String>,
}

fn parse_number(raw: &str, field: &str) -> Result<f64, ProviderError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ProviderError::Malformed(format!("{} is not a number: {:?}", field, raw)))
}

// ============================================================================
// Alpha Vantage Adapter
// ============================================================================

/// Alpha Vantage adapter.
pub struct AlphaVantageAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    priority: u8,
}

impl AlphaVantageAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, priority: u8) -> Self {
        Self {
            client: http_client(20),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            priority,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            priority: settings.priority,
        }
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let span = (range.end - range.start).num_days();
        let output_size = if span > COMPACT_CALENDAR_DAYS {
            "full"
        } else {
            "compact"
        };
        let url = format!("{}/query", self.base_url);

        debug!(symbol, output_size, "Fetching daily series from Alpha Vantage");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", output_size),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_daily(symbol, &body, range)
    }
}

fn parse_daily(symbol: &str, body: &str, range: DateRange) -> Result<Vec<PriceBar>, ProviderError> {
    let response: DailyResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("TIME_SERIES_DAILY: {}", e)))?;

    if let Some(message) = response.note.or(response.information) {
        let lowered = message.to_lowercase();
        return Err(if lowered.contains("api key") && !lowered.contains("frequency") {
            ProviderError::Auth(message)
        } else {
            ProviderError::RateLimited {
                retry_after_secs: Some(60),
            }
        });
    }
    if response.error_message.is_some() {
        return Err(ProviderError::SymbolNotFound(symbol.to_string()));
    }

    let Some(series) = response.series else {
        return Err(ProviderError::Malformed(
            "missing \"Time Series (Daily)\"".into(),
        ));
    };

    series
        .into_iter()
        .filter(|(date, _)| range.contains(*date))
        .map(|(date, entry)| {
            Ok(PriceBar {
                symbol: symbol.to_string(),
                date,
                open: parse_number(&entry.open, "open")?,
                high: parse_number(&entry.high, "high")?,
                low: parse_number(&entry.low, "low")?,
                close: parse_number(&entry.close, "close")?,
                volume: match entry.volume {
                    Some(v) => parse_number(&v, "volume")?,
                    None => 0.0,
                },
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for AlphaVantageAdapter {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::single_symbol()
    }

    async fn fetch_batch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<PartialResult, ProviderError> {
        let mut result = PartialResult::new();
        for symbol in symbols {
            match self.fetch_symbol(symbol, range).await {
                Ok(bars) => result.insert_bars(symbol, bars),
                Err(ProviderError::SymbolNotFound(_)) => {
                    result.fail(symbol, ProviderError::SymbolNotFound(symbol.clone()))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================
