//! Average True Range.
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|).
//! ATR here is the simple mean of the trailing `length` true ranges, so it
//! needs `length + 1` bars: the first bar has no previous close and yields
//! no true-range sample.

use statrs::statistics::Statistics;

use crate::models::Bar;

/// True range for every bar that has a previous close (`bars.len() - 1` samples).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            // f64::max skips NaN, so a missing field has to poison the sample explicitly
            if bar.high.is_nan() || bar.low.is_nan() || prev.close.is_nan() {
                return f64::NAN;
            }
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs())
        })
        .collect()
}

/// ATR evaluated at the most recent bar.
///
/// `None` when fewer than `length + 1` bars are available, when `length` is
/// zero, or when the inputs produce a non-finite value. Never a stand-in zero.
pub fn atr(bars: &[Bar], length: usize) -> Option<f64> {
    if length == 0 || bars.len() < length + 1 {
        return None;
    }

    let tr = true_range(bars);
    let window = &tr[tr.len() - length..];
    let value = window.iter().mean();

    (value.is_finite() && value >= 0.0).then_some(value)
}
