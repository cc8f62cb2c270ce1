//! RSI - relative strength index with Wilder smoothing.
//!
//! The first `period` deltas seed average gain and loss; each later delta
//! updates them as `avg = (avg * (period - 1) + x) / period`. The result is
//! clamped to [5, 95] so a quiet tape cannot pin it to an extreme.

use super::{ensure_finite, IndicatorError};

pub const NEUTRAL: f64 = 50.0;
/// Value when the window had gains but no losses
const NO_LOSS_VALUE: f64 = 90.0;
const FLOOR: f64 = 5.0;
const CEILING: f64 = 95.0;

pub fn rsi(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 || closes.len() < period + 1 {
        return Ok(NEUTRAL);
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (mut avg_gain, mut avg_loss) = deltas[..period]
        .iter()
        .fold((0.0, 0.0), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let n = period as f64;
    for &delta in &deltas[period..] {
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    ensure_finite("rsi", avg_gain + avg_loss)?;

    let value = if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            NEUTRAL
        } else {
            NO_LOSS_VALUE
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    ensure_finite("rsi", value.clamp(FLOOR, CEILING))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_history_is_neutral() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 14).unwrap(), NEUTRAL);
    }

    #[test]
    fn test_only_gains() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14).unwrap(), 90.0);
    }

    #[test]
    fn test_flat_series() {
        assert_eq!(rsi(&[10.0; 30], 14).unwrap(), NEUTRAL);
    }

    #[test]
    fn test_only_losses_clamped() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&closes, 14).unwrap(), FLOOR);
    }

    #[test]
    fn test_balanced_moves_near_fifty() {
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let value = rsi(&closes, 14).unwrap();
        assert!((value - 50.0).abs() < 5.0, "rsi = {}", value);
    }

    #[test]
    fn test_wilder_seed_value() {
        // 14 deltas: 7 gains of 1, 7 losses of 0.5 -> RS = 2 -> RSI 66.67
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 1.0 } else { last - 0.5 });
        }
        let value = rsi(&closes, 14).unwrap();
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }
}
