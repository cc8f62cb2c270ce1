//! Technical indicator engine.
//!
//! One file per indicator; each is a pure function of the price window and
//! returns `Result<_, IndicatorError>`. The engine isolates failures per
//! indicator: an error is logged and replaced by that indicator's neutral
//! default, so one bad value never blanks the whole set. Short history is not
//! an error; every indicator has a documented neutral value for it.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod cci;
pub mod ema;
pub mod levels;
pub mod macd;
pub mod rsi;
pub mod stochastic;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tickwise_common::IndicatorSettings;
use tracing::{debug, warn};

use crate::clean::CleanReport;
use crate::data::PriceBar;

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("{indicator}: non-finite value")]
    NonFinite { indicator: &'static str },
}

/// Pass `value` through when finite.
pub fn ensure_finite(indicator: &'static str, value: f64) -> Result<f64, IndicatorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(IndicatorError::NonFinite { indicator })
    }
}

/// Bessel-corrected standard deviation; `None` below two values.
pub(crate) fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

// ============================================================================
// Indicator Set
// ============================================================================

/// Every indicator for one (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSet {
    pub symbol: String,
    pub date: NaiveDate,
    pub rsi_14: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub ema_50: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_k: f64,
    pub atr_14: f64,
    pub adx_14: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub cci_20: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub support: [f64; 3],
    pub resistance: [f64; 3],
    /// Carried over from the cleaner
    pub low_confidence: bool,
    /// Indicators that failed and hold their neutral default
    pub defaulted: Vec<String>,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    /// Most recent bars considered per computation
    pub max_window: usize,
    /// CCI scaling constant
    pub cci_constant: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self::from(&IndicatorSettings::default())
    }
}

impl From<&IndicatorSettings> for IndicatorConfig {
    fn from(settings: &IndicatorSettings) -> Self {
        Self {
            max_window: settings.max_window.max(1),
            cci_constant: settings.cci_constant,
        }
    }
}

/// Computes indicator sets; stateless and shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

/// Unwraps an indicator result, falling back to its neutral value.
struct Isolation<'a> {
    symbol: &'a str,
    date: NaiveDate,
    defaulted: Vec<String>,
}

impl Isolation<'_> {
    fn take<T>(&mut self, result: Result<T, IndicatorError>, neutral: impl FnOnce() -> T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    symbol = %self.symbol,
                    date = %self.date,
                    error = %e,
                    "Indicator failed, using neutral default"
                );
                let IndicatorError::NonFinite { indicator } = e;
                self.defaulted.push(indicator.to_string());
                neutral()
            }
        }
    }
}

/// Neutral values must themselves be usable.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Indicators for the last bar of `bars` (chronological, one symbol).
    ///
    /// `None` only when `bars` is empty.
    pub fn compute(&self, symbol: &str, bars: &[PriceBar], low_confidence: bool) -> Option<IndicatorSet> {
        let last = bars.last()?;
        let window = &bars[bars.len().saturating_sub(self.config.max_window)..];
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();

        let mut iso = Isolation {
            symbol,
            date: last.date,
            defaulted: Vec::new(),
        };

        let ema_neutral = || finite_or_zero(ema::neutral(&closes));
        let rsi_14 = iso.take(rsi::rsi(&closes, RSI_PERIOD), || rsi::NEUTRAL);
        let ema_12 = iso.take(ema::ema(&closes, 12), ema_neutral);
        let ema_26 = iso.take(ema::ema(&closes, 26), ema_neutral);
        let ema_50 = iso.take(ema::ema(&closes, 50), ema_neutral);
        let macd = iso.take(macd::macd(&closes), || macd::NEUTRAL);
        let bands = iso.take(bollinger::bollinger(&closes), || {
            let mut value = bollinger::neutral(&closes);
            value.middle = finite_or_zero(value.middle);
            value.upper = value.middle;
            value.lower = value.middle;
            value
        });
        let atr_14 = iso.take(atr::atr(window, ATR_PERIOD), || atr::NEUTRAL);
        let adx = iso.take(adx::adx(window, ADX_PERIOD), || adx::NEUTRAL);
        let cci_20 = iso.take(
            cci::cci(window, cci::PERIOD, self.config.cci_constant),
            || cci::NEUTRAL,
        );
        let stoch = iso.take(stochastic::stochastic(window), || stochastic::NEUTRAL);
        let levels = iso.take(levels::levels(window), || levels::neutral(window));

        if !iso.defaulted.is_empty() {
            debug!(symbol = %symbol, defaulted = ?iso.defaulted, "Indicator set has defaults");
        }

        Some(IndicatorSet {
            symbol: symbol.to_string(),
            date: last.date,
            rsi_14,
            ema_12,
            ema_26,
            ema_50,
            macd_line: macd.line,
            macd_signal: macd.signal,
            macd_histogram: macd.histogram,
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            bb_k: bands.k,
            atr_14,
            adx_14: adx.adx,
            plus_di: adx.plus_di,
            minus_di: adx.minus_di,
            cci_20,
            stoch_k: stoch.k,
            stoch_d: stoch.d,
            support: levels.support,
            resistance: levels.resistance,
            low_confidence,
            defaulted: iso.defaulted,
        })
    }

    /// One set per bar, each from the window ending at that bar.
    pub fn compute_history(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        low_confidence: bool,
    ) -> Vec<IndicatorSet> {
        (1..=bars.len())
            .into_par_iter()
            .filter_map(|end| self.compute(symbol, &bars[..end], low_confidence))
            .collect()
    }

    /// Latest set for every cleaned series, in parallel across symbols.
    pub fn compute_all(&self, series: &BTreeMap<String, CleanReport>) -> BTreeMap<String, IndicatorSet> {
        series
            .par_iter()
            .filter_map(|(symbol, report)| {
                self.compute(symbol, &report.bars, report.low_confidence)
                    .map(|set| (symbol.clone(), set))
            })
            .collect()
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

/// Bars from `(open, high, low, close)` tuples on consecutive days.
#[cfg(test)]
pub(crate) fn test_bars(data: &[(f64, f64, f64, f64)]) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| PriceBar {
            symbol: "TEST".to_string(),
            date: start + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        })
        .collect()
}
