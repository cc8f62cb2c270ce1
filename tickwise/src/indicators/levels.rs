//! Support and resistance tiers from rolling extremes (20 / 50 / 100 bars).
//!
//! Support tier `n` is the lowest low of its window, resistance the highest
//! high; windows are capped at the available history and skip bars without
//! finite positive prices. Tiers are kept strictly ordered (support 1 > 2 > 3,
//! resistance 1 < 2 < 3, support 1 < resistance 1): a tier that equals or
//! crosses the previous one is pushed 0.5% (tier 2) or 1% (tier 3) beyond
//! tier 1, or 0.5% beyond the previous tier when that is not enough. A flat
//! window splits tier 1 0.5% either side of its price.

use serde::Serialize;

use super::{ensure_finite, IndicatorError};
use crate::data::PriceBar;

pub const WINDOWS: [usize; 3] = [20, 50, 100];
const STEP: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Levels {
    pub support: [f64; 3],
    pub resistance: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Below,
    Above,
}

impl Side {
    fn sign(self) -> f64 {
        match self {
            Side::Below => -1.0,
            Side::Above => 1.0,
        }
    }

    /// `a` lies strictly beyond `b` on this side.
    fn beyond(self, a: f64, b: f64) -> bool {
        self.sign() * (a - b) > 0.0
    }
}

/// One tier step away from `base`; absolute when `base` is zero.
fn step(base: f64) -> f64 {
    if base == 0.0 {
        STEP
    } else {
        base.abs() * STEP
    }
}

/// Tiers one, two and three steps away from the last usable close.
pub fn neutral(bars: &[PriceBar]) -> Levels {
    let close = bars
        .iter()
        .rev()
        .map(|b| b.close)
        .find(|c| c.is_finite() && *c > 0.0)
        .unwrap_or(0.0);
    let unit = step(close);
    Levels {
        support: [close - unit, close - 2.0 * unit, close - 3.0 * unit],
        resistance: [close + unit, close + 2.0 * unit, close + 3.0 * unit],
    }
}

fn separate(mut tiers: [f64; 3], side: Side) -> [f64; 3] {
    let base = tiers[0];
    if !base.is_finite() {
        return tiers;
    }

    let unit = step(base);
    for i in 1..tiers.len() {
        let previous = tiers[i - 1];
        if side.beyond(tiers[i], previous) {
            continue;
        }
        let pushed = base + side.sign() * unit * i as f64;
        tiers[i] = if side.beyond(pushed, previous) {
            pushed
        } else {
            previous + side.sign() * step(previous)
        };
    }
    tiers
}

/// Tiers from the bars whose prices are all finite and positive.
pub fn levels(bars: &[PriceBar]) -> Result<Levels, IndicatorError> {
    let priced: Vec<&PriceBar> = bars.iter().filter(|b| b.has_valid_prices()).collect();
    if priced.is_empty() {
        return Ok(neutral(bars));
    }

    let mut support = [0.0; 3];
    let mut resistance = [0.0; 3];
    for (tier, &window) in WINDOWS.iter().enumerate() {
        let recent = &priced[priced.len().saturating_sub(window)..];
        support[tier] = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        resistance[tier] = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    }

    // a range-less window gives no room between the first tiers
    if resistance[0] <= support[0] {
        let mid = (support[0] + resistance[0]) / 2.0;
        support[0] = mid - step(mid);
        resistance[0] = mid + step(mid);
    }

    let support = separate(support, Side::Below);
    let resistance = separate(resistance, Side::Above);
    for value in support.iter().chain(resistance.iter()) {
        ensure_finite("levels", *value)?;
    }

    Ok(Levels {
        support,
        resistance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_bars;

    fn strictly_ordered(levels: &Levels) -> bool {
        let s = levels.support;
        let r = levels.resistance;
        s[0] > s[1] && s[1] > s[2] && r[0] < r[1] && r[1] < r[2]
    }

    #[test]
    fn test_short_history_tiers_pushed_apart() {
        let data: Vec<_> = (0..10).map(|_| (100.0, 110.0, 90.0, 100.0)).collect();
        let value = levels(&test_bars(&data)).unwrap();
        assert_eq!(value.support[0], 90.0);
        assert!((value.support[1] - 90.0 * 0.995).abs() < 1e-9);
        assert!((value.support[2] - 90.0 * 0.99).abs() < 1e-9);
        assert_eq!(value.resistance[0], 110.0);
        assert!((value.resistance[2] - 110.0 * 1.01).abs() < 1e-9);
        assert!(strictly_ordered(&value));
    }

    #[test]
    fn test_natural_tiers_kept() {
        // older bars range wider, so longer windows see deeper extremes
        let data: Vec<_> = (0..100)
            .map(|i| {
                let width = 100.0 - i as f64 * 0.5;
                (100.0, 100.0 + width, 100.0 - width * 0.5, 100.0)
            })
            .collect();
        let bars = test_bars(&data);
        let value = levels(&bars).unwrap();
        assert_eq!(value.support[2], bars[0].low);
        assert_eq!(value.resistance[2], bars[0].high);
        assert!(strictly_ordered(&value));
    }

    #[test]
    fn test_near_tier_pushed_further() {
        // tier 3 sits just below tier 2 after tier 2 was pushed
        let tiers = separate([100.0, 100.0, 99.6], Side::Below);
        assert!((tiers[1] - 99.5).abs() < 1e-9);
        assert!((tiers[2] - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_deep_tier_collision() {
        // tier 2 far below tier 1, tier 3 equal to it
        let tiers = separate([100.0, 50.0, 50.0], Side::Below);
        assert_eq!(tiers[1], 50.0);
        assert!((tiers[2] - 49.75).abs() < 1e-9);

        let tiers = separate([100.0, 180.0, 180.0], Side::Above);
        assert!((tiers[2] - 180.9).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_from_close() {
        let data = [(50.0, 51.0, 49.0, 50.0)];
        let value = neutral(&test_bars(&data));
        assert!((value.support[0] - 49.75).abs() < 1e-9);
        assert!((value.resistance[0] - 50.25).abs() < 1e-9);
        assert!((value.support[2] - 49.25).abs() < 1e-9);
        assert!(strictly_ordered(&value));
        assert!(value.support[0] < value.resistance[0]);
    }

    #[test]
    fn test_neutral_skips_unusable_close() {
        let mut bars = test_bars(&[(20.0, 21.0, 19.0, 20.0), (20.0, 21.0, 19.0, 20.0)]);
        bars[1].close = -3.0;
        let value = neutral(&bars);
        assert!((value.support[0] - 19.9).abs() < 1e-9);

        let empty = neutral(&[]);
        assert!(strictly_ordered(&empty));
        assert!(empty.support[0] < empty.resistance[0]);
    }

    #[test]
    fn test_flat_window_splits_first_tier() {
        let data: Vec<_> = (0..30).map(|_| (0.8, 0.8, 0.8, 0.8)).collect();
        let value = levels(&test_bars(&data)).unwrap();
        assert!((value.support[0] - 0.796).abs() < 1e-12);
        assert!((value.resistance[0] - 0.804).abs() < 1e-12);
        assert!(strictly_ordered(&value));
    }

    #[test]
    fn test_unpriced_bars_ignored() {
        let mut bars = test_bars(&[(100.0, 101.0, 99.0, 100.0); 10]);
        for bar in bars.iter_mut().step_by(3) {
            bar.low = -1.0;
        }
        let value = levels(&bars).unwrap();
        assert_eq!(value.support[0], 99.0);
        assert_eq!(value.resistance[0], 101.0);
        assert!(strictly_ordered(&value));
    }

    #[test]
    fn test_non_positive_base_still_separated() {
        let tiers = separate([-1.0, -1.0, -1.0], Side::Below);
        assert!(tiers[0] > tiers[1] && tiers[1] > tiers[2]);
        let tiers = separate([0.0, 0.0, 0.0], Side::Above);
        assert!(tiers[0] < tiers[1] && tiers[1] < tiers[2]);
    }
}
