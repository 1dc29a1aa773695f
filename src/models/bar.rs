//! OHLCV bar and sampling timeframe.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sampling period of market data.
///
/// Prices are kept as `f64`: bars only feed indicator math, and money is
/// converted to `Decimal` once a snapshot is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Period open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Sort bars ascending by timestamp and drop duplicate periods, keeping the
/// last copy seen for each timestamp.
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);

    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Candle granularity supported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    SixHours,
    OneDay,
}

impl Timeframe {
    /// Length of one bar in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 60,
            Timeframe::FiveMinutes => 300,
            Timeframe::FifteenMinutes => 900,
            Timeframe::OneHour => 3_600,
            Timeframe::SixHours => 21_600,
            Timeframe::OneDay => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::SixHours => "6h",
            Timeframe::OneDay => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "1d" => Ok(Self::OneDay),
            other => Err(format!(
                "unsupported timeframe '{}' (expected 1m, 5m, 15m, 1h, 6h or 1d)",
                other
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(secs: i64, close: f64) -> Bar {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        Bar::new(ts, close, close, close, close, 1.0)
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let bars = vec![bar_at(120, 3.0), bar_at(0, 1.0), bar_at(60, 2.0), bar_at(60, 2.5)];
        let out = normalize_bars(bars);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].close, 1.0);
        assert_eq!(out[1].close, 2.5);
        assert_eq!(out[2].close, 3.0);
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("15M".parse::<Timeframe>().unwrap(), Timeframe::FifteenMinutes);
        assert_eq!(Timeframe::OneHour.seconds(), 3_600);
        assert!("2m".parse::<Timeframe>().is_err());
    }
}
