//! EMA - exponential moving average.
//!
//! Seeded with the SMA of the first `period` values, then
//! `ema = alpha * price + (1 - alpha) * prev` with `alpha = 2 / (period + 1)`.

use super::{ensure_finite, IndicatorError};

/// EMA series aligned so that `out[k]` belongs to `values[period - 1 + k]`.
///
/// Empty when there are fewer than `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &value in &values[period..] {
        prev = alpha * value + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Latest EMA; the last value (0 when empty) while history is short.
pub fn ema(values: &[f64], period: usize) -> Result<f64, IndicatorError> {
    let value = match ema_series(values, period).last() {
        Some(v) => *v,
        None => neutral(values),
    };
    ensure_finite("ema", value)
}

pub fn neutral(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or(0.0)
}
