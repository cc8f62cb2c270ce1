//! ADX(14) with +DI / -DI (Wilder).
//!
//! +DM / -DM and TR are Wilder-smoothed in running-sum form. A DX sample is
//! only taken where smoothed TR and DI+ + DI- are both non-zero; undefined
//! samples are skipped rather than forced to 0 or 100, so flat stretches
//! cannot drag the ADX recurrence into a constant extreme. ADX is the Wilder
//! average of the DX samples (plain mean while fewer than `period` exist).

use serde::Serialize;

use super::atr::{true_ranges, wilder_average};
use super::{ensure_finite, IndicatorError};
use crate::data::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

pub const NEUTRAL: Adx = Adx {
    adx: 20.0,
    plus_di: 0.0,
    minus_di: 0.0,
};

pub fn adx(bars: &[PriceBar], period: usize) -> Result<Adx, IndicatorError> {
    if period == 0 || bars.len() <= period {
        return Ok(NEUTRAL);
    }

    let tr = true_ranges(bars);
    let (plus_dm, minus_dm): (Vec<f64>, Vec<f64>) = bars
        .windows(2)
        .map(|w| {
            let up = w[1].high - w[0].high;
            let down = w[0].low - w[1].low;
            let plus = if up > down && up > 0.0 { up } else { 0.0 };
            let minus = if down > up && down > 0.0 { down } else { 0.0 };
            (plus, minus)
        })
        .unzip();

    let n = period as f64;
    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();

    let mut dx_samples = Vec::with_capacity(tr.len() - period + 1);
    let mut last_di = None;

    let mut sample = |s_tr: f64, s_plus: f64, s_minus: f64| {
        if s_tr <= 0.0 {
            return;
        }
        let plus_di = 100.0 * s_plus / s_tr;
        let minus_di = 100.0 * s_minus / s_tr;
        last_di = Some((plus_di, minus_di));
        let sum = plus_di + minus_di;
        if sum > 0.0 {
            dx_samples.push(100.0 * (plus_di - minus_di).abs() / sum);
        }
    };

    sample(s_tr, s_plus, s_minus);
    for i in period..tr.len() {
        s_tr = s_tr - s_tr / n + tr[i];
        s_plus = s_plus - s_plus / n + plus_dm[i];
        s_minus = s_minus - s_minus / n + minus_dm[i];
        sample(s_tr, s_plus, s_minus);
    }

    let (plus_di, minus_di) = last_di.unwrap_or((NEUTRAL.plus_di, NEUTRAL.minus_di));
    let adx = match wilder_average(&dx_samples, period) {
        Some(value) => value,
        None if !dx_samples.is_empty() => {
            dx_samples.iter().sum::<f64>() / dx_samples.len() as f64
        }
        None => NEUTRAL.adx,
    };

    Ok(Adx {
        adx: ensure_finite("adx", adx)?.clamp(0.0, 100.0),
        plus_di: ensure_finite("adx", plus_di)?.max(0.0),
        minus_di: ensure_finite("adx", minus_di)?.max(0.0),
    })
}
