//! Indicator library: pure functions over an ordered bar series.

mod atr;
mod ema;

pub use atr::atr;
pub use ema::{latest_emas, trend_signal, TrendSignal};

use crate::models::Bar;

/// Highest high over the trailing `lookback` bars, current bar included.
pub fn highest_high(bars: &[Bar], lookback: usize) -> Option<f64> {
    trailing(bars, lookback)?
        .iter()
        .map(|b| b.high)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
        .filter(|v| v.is_finite())
}

/// Lowest low over the trailing `lookback` bars, current bar included.
pub fn lowest_low(bars: &[Bar], lookback: usize) -> Option<f64> {
    trailing(bars, lookback)?
        .iter()
        .map(|b| b.low)
        .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.min(l))))
        .filter(|v| v.is_finite())
}

fn trailing(bars: &[Bar], lookback: usize) -> Option<&[Bar]> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }
    Some(&bars[bars.len() - lookback..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64) -> Bar {
        Bar::new(Utc.timestamp_opt(i * 60, 0).unwrap(), low, high, low, low, 1.0)
    }

    #[test]
    fn test_rolling_extremes_use_trailing_window() {
        let bars = vec![bar(0, 200.0, 1.0), bar(1, 110.0, 95.0), bar(2, 105.0, 99.0), bar(3, 108.0, 97.0)];

        assert_eq!(highest_high(&bars, 3), Some(110.0));
        assert_eq!(lowest_low(&bars, 3), Some(95.0));
        assert_eq!(highest_high(&bars, 4), Some(200.0));
        assert_eq!(highest_high(&bars, 5), None);
        assert_eq!(lowest_low(&bars, 0), None);
    }
}
