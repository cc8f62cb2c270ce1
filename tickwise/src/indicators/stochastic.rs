//! Stochastic oscillator (14, 3).
//!
//! %K = 100 * (close - LL) / (HH - LL) over the trailing 14 bars, 50 when the
//! range is empty. %D is the mean of the last three %K values computed from
//! the retained history (fewer when history is short).

use serde::Serialize;

use super::{ensure_finite, IndicatorError};
use crate::data::PriceBar;

pub const K_PERIOD: usize = 14;
pub const D_PERIOD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

pub const NEUTRAL: Stochastic = Stochastic { k: 50.0, d: 50.0 };

fn percent_k(window: &[PriceBar]) -> f64 {
    let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let close = window[window.len() - 1].close;
    let range = highest - lowest;
    if range <= 0.0 {
        return NEUTRAL.k;
    }
    (100.0 * (close - lowest) / range).clamp(0.0, 100.0)
}

pub fn stochastic(bars: &[PriceBar]) -> Result<Stochastic, IndicatorError> {
    if bars.len() < K_PERIOD {
        return Ok(NEUTRAL);
    }

    let k_history: Vec<f64> = bars
        .windows(K_PERIOD)
        .rev()
        .take(D_PERIOD)
        .map(percent_k)
        .collect();

    let k = ensure_finite("stochastic", k_history[0])?;
    let d = k_history.iter().sum::<f64>() / k_history.len() as f64;

    Ok(Stochastic {
        k,
        d: ensure_finite("stochastic", d)?.clamp(0.0, 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    #[test]
    fn test_close_at_high() {
        let data: Vec<_> = (0..20)
            .map(|i| {
                let p = 10.0 + i as f64;
                (p, p + 1.0, p - 1.0, p + 1.0)
            })
            .collect();
        let value = stochastic(&test_bars(&data)).unwrap();
        assert_eq!(value.k, 100.0);
        assert_eq!(value.d, 100.0);
    }

    #[test]
    fn test_empty_range_is_fifty() {
        let data: Vec<_> = (0..20).map(|_| (10.0, 10.0, 10.0, 10.0)).collect();
        assert_eq!(stochastic(&test_bars(&data)).unwrap(), NEUTRAL);
    }

    #[test]
    fn test_d_uses_available_k_values() {
        // exactly one full window: %D equals %K
        let data: Vec<_> = (0..14)
            .map(|i| {
                let p = 10.0 + (i % 3) as f64;
                (p, p + 1.0, p - 1.0, p)
            })
            .collect();
        let value = stochastic(&test_bars(&data)).unwrap();
        assert_eq!(value.k, value.d);
    }

    #[test]
    fn test_d_averages_last_three() {
        let mut data: Vec<_> = (0..14).map(|_| (10.0, 12.0, 8.0, 10.0)).collect();
        data.push((10.0, 12.0, 8.0, 12.0)); // %K 100
        data.push((10.0, 12.0, 8.0, 8.0)); // %K 0
        let value = stochastic(&test_bars(&data)).unwrap();
        assert_eq!(value.k, 0.0);
        assert!((value.d - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_neutral() {
        let data: Vec<_> = (0..5).map(|_| (10.0, 11.0, 9.0, 10.0)).collect();
        assert_eq!(stochastic(&test_bars(&data)).unwrap(), NEUTRAL);
    }
}
