//! Bollinger bands (20) with a volatility-adaptive width.
//!
//! Middle = SMA20, sigma = sample standard deviation of the same window.
//! The multiplier starts at 2.0 and is scaled by the ratio of recent (10)
//! to longer-run (up to 60) return volatility, clamped to [0.75, 1.25], so
//! `k` stays within [1.5, 2.5].

use serde::Serialize;

use super::{ensure_finite, sample_std, IndicatorError};

pub const PERIOD: usize = 20;
pub const BASE_K: f64 = 2.0;
const SHORT_RETURNS: usize = 10;
const LONG_RETURNS: usize = 60;
/// Fewer returns than this leave `k` at its base value
const MIN_RETURNS: usize = 20;
const RATIO_MIN: f64 = 0.75;
const RATIO_MAX: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub k: f64,
}

/// All bands on the last close.
pub fn neutral(closes: &[f64]) -> Bollinger {
    let last = closes.last().copied().unwrap_or(0.0);
    Bollinger {
        upper: last,
        middle: last,
        lower: last,
        k: BASE_K,
    }
}

/// Band multiplier from the volatility regime.
pub fn adaptive_k(closes: &[f64]) -> f64 {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < MIN_RETURNS {
        return BASE_K;
    }

    let long = &returns[returns.len().saturating_sub(LONG_RETURNS)..];
    let short = &returns[returns.len() - SHORT_RETURNS..];
    let (Some(long_sigma), Some(short_sigma)) = (sample_std(long), sample_std(short)) else {
        return BASE_K;
    };
    if long_sigma <= 0.0 || !long_sigma.is_finite() || !short_sigma.is_finite() {
        return BASE_K;
    }

    BASE_K * (short_sigma / long_sigma).clamp(RATIO_MIN, RATIO_MAX)
}

pub fn bollinger(closes: &[f64]) -> Result<Bollinger, IndicatorError> {
    if closes.len() < PERIOD {
        return Ok(neutral(closes));
    }

    let window = &closes[closes.len() - PERIOD..];
    let middle = window.iter().sum::<f64>() / PERIOD as f64;
    let sigma = sample_std(window).unwrap_or(0.0);
    let k = adaptive_k(closes);

    Ok(Bollinger {
        upper: ensure_finite("bollinger", middle + k * sigma)?,
        middle: ensure_finite("bollinger", middle)?,
        lower: ensure_finite("bollinger", middle - k * sigma)?,
        k,
    })
}
