//! Yahoo Finance chart API adapter.
//!
//! One symbol per request. The chart endpoint answers with columnar arrays:
//! a `timestamp` list plus parallel `open`/`high`/`low`/`close`/`volume`
//! lists, where missing sessions carry `null`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime};
use serde::Deserialize;
use tickwise_common::ProviderSettings;
use tracing::debug;

use super::provider::{MarketDataProvider, PartialResult, ProviderCapabilities, ProviderError};
use super::{http_client, DateRange, PriceBar};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ============================================================================
// Yahoo Adapter
// ============================================================================

/// Yahoo chart API adapter.
pub struct YahooChartAdapter {
    client: reqwest::Client,
    base_url: String,
    priority: u8,
}

impl YahooChartAdapter {
    pub fn new(base_url: impl Into<String>, priority: u8) -> Self {
        Self {
            client: http_client(20),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            priority,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            client: http_client(settings.timeout_secs),
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            priority: settings.priority,
        }
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let period1 = range.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        // period2 is exclusive
        let period2 = (range.end + chrono::Duration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        debug!(symbol, %url, "Fetching chart from Yahoo");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_chart(symbol, &body, range)
    }
}

/// Normalise a chart payload into bars inside `range`.
fn parse_chart(symbol: &str, body: &str, range: DateRange) -> Result<Vec<PriceBar>, ProviderError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("chart: {}", e)))?;

    if let Some(error) = envelope.chart.error {
        return Err(match error.code.as_str() {
            "Not Found" => ProviderError::SymbolNotFound(symbol.to_string()),
            _ => ProviderError::Unavailable(format!("{}: {}", error.code, error.description)),
        });
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let field = |column: &[Option<f64>]| column.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };

        let Some(date) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
            return Err(ProviderError::Malformed(format!("bad timestamp {}", ts)));
        };
        if !range.contains(date) {
            continue;
        }

        bars.push(PriceBar {
            symbol: symbol.to_string(),
            date,
            open,
            high,
            low,
            close,
            volume: field(&quote.volume).unwrap_or(0.0),
        });
    }

    Ok(bars)
}

#[async_trait]
impl MarketDataProvider for YahooChartAdapter {
    fn name(&self) -> &'static str {
        "yahoo"
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    /// US session open as a unix timestamp
    fn ts(date: NaiveDate) -> i64 {
        date.and_hms_opt(13, 30, 0).unwrap().and_utc().timestamp()
    }

    fn chart_body() -> serde_json::Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL", "currency": "USD"},
                    "timestamp": [ts(d(6)), ts(d(7)), ts(d(8))],
                    "indicators": {"quote": [{
                        "open":   [170.0, null, 172.0],
                        "high":   [171.5, null, 173.0],
                        "low":    [169.0, null, 171.0],
                        "close":  [171.0, null, 172.5],
                        "volume": [1000, null, null]
                    }]}
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_parse_chart_skips_null_sessions() {
        let range = DateRange::new(d(1), d(11));
        let bars = parse_chart("AAPL", &chart_body().to_string(), range).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d(6));
        assert_eq!(bars[0].volume, 1000.0);
        assert_eq!(bars[1].date, d(8));
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn test_parse_chart_filters_range() {
        let range = DateRange::new(d(7), d(11));
        let bars = parse_chart("AAPL", &chart_body().to_string(), range).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn test_parse_chart_error_payload() {
        let body = json!({"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}});
        let err = parse_chart("ZZZZ", &body.to_string(), DateRange::new(d(1), d(2))).unwrap_err();
        assert_eq!(err, ProviderError::SymbolNotFound("ZZZZ".into()));
    }

    #[test]
    fn test_parse_chart_malformed() {
        let err = parse_chart("AAPL", "<html>", DateRange::new(d(1), d(2))).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_fetch_batch_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"chart": {"result": null, "error": {"code": "Not Found", "description": "delisted"}}}),
            ))
            .mount(&server)
            .await;

        let adapter = YahooChartAdapter::new(server.uri(), 2);
        let result = adapter
            .fetch_batch(
                &["AAPL".to_string(), "ZZZZ".to_string()],
                DateRange::new(d(1), d(11)),
            )
            .await
            .unwrap();

        assert_eq!(result.bars["AAPL"].len(), 2);
        assert!(matches!(
            result.errors.get("ZZZZ"),
            Some(ProviderError::SymbolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = YahooChartAdapter::new(server.uri(), 2);
        let err = adapter
            .fetch_batch(&["AAPL".to_string()], DateRange::new(d(1), d(11)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let adapter = YahooChartAdapter::new(server.uri(), 2);
        let err = adapter
            .fetch_batch(&["AAPL".to_string()], DateRange::new(d(1), d(11)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
