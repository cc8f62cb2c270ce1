//! MACD(12, 26, 9).
//!
//! Line = EMA12 - EMA26 over the history where both exist; signal = EMA9 of
//! that line history; histogram = line - signal. Needs 34 closes.

use serde::Serialize;

use super::ema::ema_series;
use super::{ensure_finite, IndicatorError};

pub const FAST: usize = 12;
pub const SLOW: usize = 26;
pub const SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub const NEUTRAL: Macd = Macd {
    line: 0.0,
    signal: 0.0,
    histogram: 0.0,
};

/// MACD line history aligned with `closes[SLOW - 1..]`.
pub fn macd_line_series(closes: &[f64]) -> Vec<f64> {
    let fast = ema_series(closes, FAST);
    let slow = ema_series(closes, SLOW);
    // fast[k] belongs to closes[FAST-1+k], slow[k] to closes[SLOW-1+k]
    let offset = SLOW - FAST;
    slow.iter()
        .enumerate()
        .map(|(k, s)| fast[k + offset] - s)
        .collect()
}

pub fn macd(closes: &[f64]) -> Result<Macd, IndicatorError> {
    let line_history = macd_line_series(closes);
    let signal_history = ema_series(&line_history, SIGNAL);

    let (Some(&line), Some(&signal)) = (line_history.last(), signal_history.last()) else {
        return Ok(NEUTRAL);
    };

    Ok(Macd {
        line: ensure_finite("macd", line)?,
        signal: ensure_finite("macd", signal)?,
        histogram: ensure_finite("macd", line - signal)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_34_closes() {
        let closes: Vec<f64> = (0..33).map(|i| i as f64).collect();
        assert_eq!(macd(&closes).unwrap(), NEUTRAL);

        let closes: Vec<f64> = (0..34).map(|i| i as f64).collect();
        assert_ne!(macd(&closes).unwrap(), NEUTRAL);
    }

    #[test]
    fn test_line_alignment() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        assert_eq!(macd_line_series(&closes).len(), 40 - SLOW + 1);
    }

    #[test]
    fn test_uptrend_positive_line() {
        let closes: Vec<f64> = (0..80).map(|i| 50.0 + i as f64 * 0.5).collect();
        let value = macd(&closes).unwrap();
        assert!(value.line > 0.0);
        assert!((value.histogram - (value.line - value.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_flat_is_zero() {
        let value = macd(&[20.0; 60]).unwrap();
        assert!(value.line.abs() < 1e-12);
        assert!(value.signal.abs() < 1e-12);
    }
}
