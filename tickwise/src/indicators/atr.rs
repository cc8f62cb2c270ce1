//! True range and ATR(14).
//!
//! TR = max(high - low, |high - prev_close|, |low - prev_close|).
//! ATR is the Wilder-smoothed TR, seeded with the SMA of the first `period`
//! true ranges.

use super::{ensure_finite, IndicatorError};
use crate::data::PriceBar;

pub const NEUTRAL: f64 = 0.0;

/// True ranges for bars 1..n (the first bar has no previous close).
pub fn true_ranges(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs())
        })
        .collect()
}

/// Wilder average: SMA seed over the first `period` values, then
/// `avg = (avg * (period - 1) + x) / period`.
pub fn wilder_average(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let n = period as f64;
    let seed = values[..period].iter().sum::<f64>() / n;
    Some(
        values[period..]
            .iter()
            .fold(seed, |avg, &x| (avg * (n - 1.0) + x) / n),
    )
}

pub fn atr(bars: &[PriceBar], period: usize) -> Result<f64, IndicatorError> {
    let Some(value) = wilder_average(&true_ranges(bars), period) else {
        return Ok(NEUTRAL);
    };
    ensure_finite("atr", value)
}
