//! Price series cleaning.
//!
//! Repairs the corruption patterns seen in provider data before indicators
//! run:
//!
//! 1. **Scale corruption**: stretches quoted in cents instead of dollars (or
//!    the reverse) show up as runs whose magnitude is ~100x off the rest of
//!    the series. Runs are delimited by extreme bar-to-bar jumps and rescaled
//!    to match their trusted neighbour, provided the trusted scale covers at
//!    least two thirds of the series.
//! 2. **Invalid bars**: OHLC containment violations and non-positive or
//!    non-finite prices are dropped.
//! 3. **Spikes**: single-bar close moves beyond the implausibility threshold
//!    are dropped unless the whole bar range moved with them. The first
//!    retained bar must also agree with the median of its neighbourhood.
//!
//! When no scale holds a clear majority, or steps 2-3 would remove too much
//! of the series, cleaning is abandoned and the input is returned with
//! `low_confidence` set.

use serde::Serialize;
use tickwise_common::CleanerSettings;
use tracing::{debug, warn};

use crate::data::PriceBar;

/// log10 band around 100x inside which a run is considered rescalable
const SCALE_LOG_MIN: f64 = 1.5;
const SCALE_LOG_MAX: f64 = 2.5;

/// Share of the series trusted runs must cover before others are rescaled
const SCALE_MAJORITY: f64 = 2.0 / 3.0;

/// Neighbourhood size below which the first bar is not checked
const MIN_ANCHOR_NEIGHBOURS: usize = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Cleaner thresholds.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Relative deviation from a reference median that marks a value suspect
    pub median_guard: f64,
    /// Bar-to-bar close ratio (or inverse) that marks a jump point
    pub jump_ratio: f64,
    /// Day-over-day close move treated as implausible
    pub spike_threshold: f64,
    /// Largest fraction of bars cleaning may remove
    pub max_loss_fraction: f64,
    /// Centred rolling median window
    pub median_window: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self::from(&CleanerSettings::default())
    }
}

impl From<&CleanerSettings> for CleanerConfig {
    fn from(settings: &CleanerSettings) -> Self {
        Self {
            median_guard: settings.median_guard,
            jump_ratio: settings.jump_ratio,
            spike_threshold: settings.spike_threshold,
            max_loss_fraction: settings.max_loss_fraction,
            median_window: settings.median_window.max(1),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Cleaned series plus what was done to it.
///
/// When `low_confidence` is set, `bars` is the sorted, de-duplicated input
/// and the counters describe what cleaning found but did not apply. An
/// ambiguous price scale stops cleaning before any counting, so only
/// `duplicates` is set then.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub bars: Vec<PriceBar>,
    pub low_confidence: bool,
    pub duplicates: usize,
    pub rescaled: usize,
    pub discarded_invalid: usize,
    pub discarded_spikes: usize,
}

// ============================================================================
// Cleaner
// ============================================================================

/// Stateless cleaner; one instance serves every symbol.
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    config: CleanerConfig,
}

impl Cleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    /// Clean one symbol's series.
    pub fn clean(&self, bars: Vec<PriceBar>) -> CleanReport {
        let (original, duplicates) = sort_dedup(bars);
        let total = original.len();
        if total == 0 {
            return CleanReport::default();
        }

        let mut series = original.clone();
        let rescaled = match self.repair_scale(&mut series) {
            ScaleRepair::Applied(rescaled) => rescaled,
            ScaleRepair::Ambiguous { disputed } => {
                warn!(
                    symbol = %original[0].symbol,
                    total,
                    disputed,
                    "No price scale holds a clear majority, keeping raw data"
                );
                return CleanReport {
                    bars: original,
                    low_confidence: true,
                    duplicates,
                    ..Default::default()
                };
            }
        };

        let before = series.len();
        series.retain(PriceBar::is_consistent);
        let discarded_invalid = before - series.len();

        let (series, discarded_spikes) = self.drop_spikes(series);

        let removed = discarded_invalid + discarded_spikes;
        let symbol = original[0].symbol.clone();
        if removed as f64 > self.config.max_loss_fraction * total as f64 {
            warn!(
                symbol = %symbol,
                total,
                removed,
                "Cleaning would remove too much of the series, keeping raw data"
            );
            return CleanReport {
                bars: original,
                low_confidence: true,
                duplicates,
                rescaled,
                discarded_invalid,
                discarded_spikes,
            };
        }

        if rescaled + removed + duplicates > 0 {
            debug!(
                symbol = %symbol,
                duplicates,
                rescaled,
                discarded_invalid,
                discarded_spikes,
                "Series cleaned"
            );
        }

        CleanReport {
            bars: series,
            low_confidence: false,
            duplicates,
            rescaled,
            discarded_invalid,
            discarded_spikes,
        }
    }

    // ========================================================================
    // Scale repair
    // ========================================================================

    /// Rescale corrupted runs in place.
    ///
    /// Nothing is touched when the trusted runs cover less than two thirds
    /// of the series: which side is corrupted is then a guess.
    fn repair_scale(&self, series: &mut [PriceBar]) -> ScaleRepair {
        let closes: Vec<Option<f64>> = series
            .iter()
            .map(|b| (b.close.is_finite() && b.close > 0.0).then_some(b.close))
            .collect();

        let Some(reference) = median(closes.iter().flatten().copied().collect()) else {
            return ScaleRepair::Applied(0);
        };
        let local = rolling_median(&closes, self.config.median_window);

        let boundaries = self.jump_points(&closes, &local);
        if boundaries.is_empty() {
            return ScaleRepair::Applied(0);
        }

        // runs as [start, end) index pairs
        let mut edges = vec![0];
        edges.extend(boundaries);
        edges.push(series.len());
        let runs: Vec<Run> = edges
            .windows(2)
            .map(|w| {
                let med = median(closes[w[0]..w[1]].iter().flatten().copied().collect());
                Run {
                    start: w[0],
                    end: w[1],
                    median: med,
                    trusted: med.is_some_and(|m| deviation(m, reference) <= self.config.median_guard),
                }
            })
            .collect();

        let trusted: usize = runs.iter().filter(|r| r.trusted).map(Run::len).sum();
        if (trusted as f64) < SCALE_MAJORITY * series.len() as f64 {
            return ScaleRepair::Ambiguous {
                disputed: series.len() - trusted,
            };
        }

        let mut rescaled = 0;
        for (i, run) in runs.iter().enumerate() {
            if run.trusted {
                continue;
            }
            let Some(run_median) = run.median else {
                continue;
            };

            let neighbour = [i.checked_sub(1), Some(i + 1)]
                .into_iter()
                .flatten()
                .filter_map(|j| runs.get(j))
                .find(|r| r.trusted);
            let Some(trusted_median) = neighbour.and_then(|r| r.median) else {
                continue;
            };

            let log_ratio = (trusted_median / run_median).log10();
            if !(SCALE_LOG_MIN..=SCALE_LOG_MAX).contains(&log_ratio.abs()) {
                continue;
            }
            let factor = if log_ratio > 0.0 { 100.0 } else { 0.01 };

            for bar in &mut series[run.start..run.end] {
                bar.rescale(factor);
            }
            rescaled += run.len();

            warn!(
                symbol = %series[run.start].symbol,
                from = %series[run.start].date,
                to = %series[run.end - 1].date,
                factor,
                "Rescaled corrupted price run"
            );
        }
        ScaleRepair::Applied(rescaled)
    }

    /// Indices `i` where a run starts: `close[i]` jumped from `close[i-1]`
    /// by the jump ratio and either side is off the median of the window
    /// centred on the jump.
    fn jump_points(&self, closes: &[Option<f64>], local: &[Option<f64>]) -> Vec<usize> {
        let guard = self.config.median_guard;
        let jump = self.config.jump_ratio;

        (1..closes.len())
            .filter(|&i| {
                let (Some(prev), Some(cur), Some(m)) = (closes[i - 1], closes[i], local[i]) else {
                    return false;
                };
                let ratio = cur / prev;
                (ratio >= jump || ratio <= 1.0 / jump)
                    && (deviation(cur, m) > guard || deviation(prev, m) > guard)
            })
            .collect()
    }

    // ========================================================================
    // Spike filter
    // ========================================================================

    fn drop_spikes(&self, series: Vec<PriceBar>) -> (Vec<PriceBar>, usize) {
        let threshold = self.config.spike_threshold;
        let closes: Vec<Option<f64>> = series.iter().map(|b| Some(b.close)).collect();
        let local = rolling_median(&closes, self.config.median_window);
        let check_anchor = series.len() >= MIN_ANCHOR_NEIGHBOURS;

        let mut kept: Vec<PriceBar> = Vec::with_capacity(series.len());
        let mut dropped = 0;

        for (i, bar) in series.into_iter().enumerate() {
            let spike = match kept.last() {
                Some(prev) => {
                    let change = bar.close / prev.close - 1.0;
                    (change.abs() > threshold && !corroborated(prev, &bar, change, threshold))
                        .then_some(change)
                }
                // every later bar is measured against the first one kept
                None if check_anchor => local[i]
                    .map(|m| bar.close / m - 1.0)
                    .filter(|change| change.abs() > threshold),
                None => None,
            };
            if let Some(change) = spike {
                debug!(
                    symbol = %bar.symbol,
                    date = %bar.date,
                    change_pct = change * 100.0,
                    "Dropping implausible spike"
                );
                dropped += 1;
                continue;
            }
            kept.push(bar);
        }
        (kept, dropped)
    }
}

enum ScaleRepair {
    /// Number of bars rescaled
    Applied(usize),
    Ambiguous { disputed: usize },
}

struct Run {
    start: usize,
    end: usize,
    median: Option<f64>,
    trusted: bool,
}

impl Run {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// A genuine gap relocates the whole range: both extremes move in the
/// direction of the close by at least half the threshold.
fn corroborated(prev: &PriceBar, bar: &PriceBar, change: f64, threshold: f64) -> bool {
    let half = threshold / 2.0;
    if change > 0.0 {
        bar.high >= prev.high * (1.0 + half) && bar.low >= prev.low * (1.0 + half)
    } else {
        bar.high <= prev.high * (1.0 - half) && bar.low <= prev.low * (1.0 - half)
    }
}

fn deviation(value: f64, reference: f64) -> f64 {
    (value / reference - 1.0).abs()
}

/// Sort by date and keep the last bar of each date.
fn sort_dedup(mut bars: Vec<PriceBar>) -> (Vec<PriceBar>, usize) {
    // stable sort keeps arrival order within a date
    bars.sort_by_key(|b| b.date);
    let before = bars.len();
    let mut out: Vec<PriceBar> = Vec::with_capacity(before);
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    let duplicates = before - out.len();
    (out, duplicates)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Centred rolling median over the valid values of each window.
fn rolling_median(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            median(values[lo..hi].iter().flatten().copied().collect())
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
