//! Exponential moving average and the EMA-cross trend signal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Bar;

/// EMA of `values` with smoothing factor 2/(span+1), seeded by the first
/// value. One output per input; each output depends only on inputs up to it.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    if span == 0 {
        return vec![f64::NAN; values.len()];
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for &v in values {
        let next = match prev {
            None => v,
            // incremental form: a constant series stays exactly constant
            Some(p) => p + alpha * (v - p),
        };
        out.push(next);
        prev = Some(next);
    }

    out
}

/// Direction implied by the fast/slow EMA cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendSignal {
    Long,
    Short,
    None,
}

impl fmt::Display for TrendSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendSignal::Long => "long",
            TrendSignal::Short => "short",
            TrendSignal::None => "none",
        };
        f.write_str(s)
    }
}

/// Latest fast and slow EMA of the closes, if the series is long enough
/// (at least `slow_span` bars).
pub fn latest_emas(bars: &[Bar], fast_span: usize, slow_span: usize) -> Option<(f64, f64)> {
    if fast_span == 0 || slow_span == 0 || bars.len() < fast_span.max(slow_span) {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast = *ema(&closes, fast_span).last()?;
    let slow = *ema(&closes, slow_span).last()?;

    (fast.is_finite() && slow.is_finite()).then_some((fast, slow))
}

/// Long when fast > slow, short when fast < slow, none when equal or undefined.
pub fn trend_signal(bars: &[Bar], fast_span: usize, slow_span: usize) -> TrendSignal {
    match latest_emas(bars, fast_span, slow_span) {
        Some((fast, slow)) if fast > slow => TrendSignal::Long,
        Some((fast, slow)) if fast < slow => TrendSignal::Short,
        _ => TrendSignal::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(Utc.timestamp_opt(i as i64 * 60, 0).unwrap(), c, c, c, c, 1.0))
            .collect()
    }

    #[test]
    fn test_ema_seeded_by_first_value() {
        // span 3 -> alpha 0.5
        let out = ema(&[10.0, 20.0, 30.0], 3);
        assert_eq!(out, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn test_ema_appending_changes_only_last_value() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let before = ema(&closes[..39], 10);
        let after = ema(&closes, 10);

        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(&after[..39], &before[..]);
    }

    #[test]
    fn test_trend_signal_directions() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let flat = vec![100.0; 40];

        assert_eq!(trend_signal(&bars_from_closes(&rising), 10, 30), TrendSignal::Long);
        assert_eq!(trend_signal(&bars_from_closes(&falling), 10, 30), TrendSignal::Short);
        assert_eq!(trend_signal(&bars_from_closes(&flat), 10, 30), TrendSignal::None);
    }

    #[test]
    fn test_ema_of_constant_series_is_exact() {
        let flat = vec![2013.37; 200];
        for span in [3, 10, 30, 99] {
            assert!(ema(&flat, span).iter().all(|&v| v == 2013.37));
        }

        // fast and slow must agree bit for bit on a flat tape
        let closes = vec![0.1 + 0.2; 60];
        assert_eq!(latest_emas(&bars_from_closes(&closes), 10, 30), Some((0.1 + 0.2, 0.1 + 0.2)));
        assert_eq!(trend_signal(&bars_from_closes(&closes), 7, 25), TrendSignal::None);
    }

    #[test]
    fn test_trend_signal_none_with_insufficient_bars() {
        let rising: Vec<f64> = (0..29).map(|i| 100.0 + i as f64).collect();
        assert_eq!(trend_signal(&bars_from_closes(&rising), 10, 30), TrendSignal::None);
    }
}
