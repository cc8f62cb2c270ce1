//! CCI(20) - commodity channel index.
//!
//! `(tp - SMA(tp)) / (c * MAD)` over the trailing window of typical prices,
//! where MAD is the mean absolute deviation from the SMA.

use super::{ensure_finite, IndicatorError};
use crate::data::PriceBar;

pub const PERIOD: usize = 20;
/// Lambert's constant, matching the TA-Lib reference output
pub const DEFAULT_CONSTANT: f64 = 0.015;
pub const NEUTRAL: f64 = 0.0;

pub fn cci(bars: &[PriceBar], period: usize, constant: f64) -> Result<f64, IndicatorError> {
    if period == 0 || bars.len() < period {
        return Ok(NEUTRAL);
    }

    let typical: Vec<f64> = bars[bars.len() - period..]
        .iter()
        .map(PriceBar::typical_price)
        .collect();
    let n = period as f64;
    let mean = typical.iter().sum::<f64>() / n;
    let mad = typical.iter().map(|tp| (tp - mean).abs()).sum::<f64>() / n;
    ensure_finite("cci", mad)?;

    if mad == 0.0 || constant == 0.0 {
        return Ok(NEUTRAL);
    }

    let last = typical[typical.len() - 1];
    ensure_finite("cci", (last - mean) / (constant * mad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    #[test]
    fn test_linear_typical_price() {
        // tp = 1..=20: mean 10.5, MAD 5, last 20 -> 9.5 / 0.075
        let data: Vec<_> = (1..=20)
            .map(|i| {
                let p = i as f64;
                (p, p, p, p)
            })
            .collect();
        let value = cci(&test_bars(&data), PERIOD, DEFAULT_CONSTANT).unwrap();
        assert!((value - 126.666_666_666).abs() < 1e-6, "cci = {}", value);
    }

    #[test]
    fn test_flat_is_zero() {
        let data: Vec<_> = (0..25).map(|_| (10.0, 11.0, 9.0, 10.0)).collect();
        assert_eq!(cci(&test_bars(&data), PERIOD, DEFAULT_CONSTANT).unwrap(), 0.0);
    }

    #[test]
    fn test_short_history_neutral() {
        let data: Vec<_> = (0..5).map(|i| (i as f64, i as f64, i as f64, i as f64)).collect();
        assert_eq!(cci(&test_bars(&data), PERIOD, DEFAULT_CONSTANT).unwrap(), NEUTRAL);
    }

    #[test]
    fn test_constant_scales_inversely() {
        let data: Vec<_> = (1..=20)
            .map(|i| {
                let p = i as f64;
                (p, p, p, p)
            })
            .collect();
        let bars = test_bars(&data);
        let a = cci(&bars, PERIOD, 0.015).unwrap();
        let b = cci(&bars, PERIOD, 0.030).unwrap();
        assert!((a - 2.0 * b).abs() < 1e-9);
    }
}
