//! Engine and webhook configuration. Immutable once validated.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::Timeframe;

use super::SizingMode;

/// Where an exit takes its quantity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitSizing {
    /// Sum of confirmed fills tracked by the position state
    Tracked,
    /// Full base-asset balance from the account (long exits only)
    Balance,
}

impl std::str::FromStr for ExitSizing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tracked" => Ok(Self::Tracked),
            "balance" => Ok(Self::Balance),
            other => Err(format!("unknown exit sizing '{}' (expected tracked or balance)", other)),
        }
    }
}

/// Risk and pyramiding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Share of balance risked (fixed-risk) or spent (fixed-spend) per order, in (0, 1]
    pub risk_fraction: Decimal,

    /// ATR lookback; also the window for the trailing high/low
    pub atr_lookback: usize,

    /// Initial stop distance from the entry, in ATRs
    pub stop_atr_mult: Decimal,

    /// Trailing stop distance from the recent extreme, in ATRs
    pub trail_atr_mult: Decimal,

    /// Favorable move since the last add required before adding again, in ATRs
    pub add_step_atr_mult: Decimal,

    /// Maximum pyramid adds per position
    pub max_adds: u32,

    /// How orders are sized
    pub sizing_mode: SizingMode,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: dec!(0.10),     // 10% per order
            atr_lookback: 7,               // short window, fast reaction
            stop_atr_mult: dec!(1.0),      // tight stop
            trail_atr_mult: dec!(1.5),     // close trail
            add_step_atr_mult: dec!(0.3),  // add quickly
            max_adds: 5,
            sizing_mode: SizingMode::FixedSpend,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.risk_fraction <= Decimal::ZERO || self.risk_fraction > Decimal::ONE {
            return Err(ConfigError::RiskFraction(self.risk_fraction));
        }
        if self.atr_lookback == 0 {
            return Err(ConfigError::ZeroLength("ATR lookback"));
        }
        for (name, value) in [
            ("stop ATR multiplier", self.stop_atr_mult),
            ("trail ATR multiplier", self.trail_atr_mult),
            ("add step ATR multiplier", self.add_step_atr_mult),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        Ok(())
    }
}

/// EMA spans for the trend signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub fast_span: usize,
    pub slow_span: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            fast_span: 10,
            slow_span: 30,
        }
    }
}

/// Configuration of the autonomous polling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Product id, e.g. "ETH-USDC"
    pub symbol: String,

    pub timeframe: Timeframe,

    /// Bars fetched per cycle
    pub bar_limit: usize,

    pub risk: RiskConfig,

    pub trend: TrendConfig,

    /// Enable the mirror-image short side (needs a venue that can short)
    pub allow_short: bool,

    pub exit_sizing: ExitSizing,

    /// Decimal places order quantities are truncated to
    pub quantity_decimals: u32,

    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "ETH-USDC".to_string(),
            timeframe: Timeframe::OneMinute,
            bar_limit: 200,
            risk: RiskConfig::default(),
            trend: TrendConfig::default(),
            allow_short: false,
            exit_sizing: ExitSizing::Tracked,
            quantity_decimals: 8,
            poll_interval_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Fewest bars that give every configured indicator a value.
    pub fn required_bars(&self) -> usize {
        (self.risk.atr_lookback + 1).max(self.trend.slow_span)
    }

    pub fn base_asset(&self) -> &str {
        split_symbol(&self.symbol).map(|(b, _)| b).unwrap_or_default()
    }

    pub fn quote_asset(&self) -> &str {
        split_symbol(&self.symbol).map(|(_, q)| q).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        split_symbol(&self.symbol)?;
        self.risk.validate()?;

        if self.trend.fast_span == 0 {
            return Err(ConfigError::ZeroLength("fast EMA span"));
        }
        if self.trend.fast_span >= self.trend.slow_span {
            return Err(ConfigError::SpanOrdering {
                fast: self.trend.fast_span,
                slow: self.trend.slow_span,
            });
        }
        if self.bar_limit < self.required_bars() {
            return Err(ConfigError::BarLimit {
                limit: self.bar_limit,
                required: self.required_bars(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroLength("poll interval"));
        }
        Ok(())
    }
}

/// Configuration of the webhook one-shot order path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar_limit: usize,
    pub atr_lookback: usize,
    pub stop_atr_mult: Decimal,
    pub risk_fraction: Decimal,
    pub sizing_mode: SizingMode,
    pub quantity_decimals: u32,
    /// Socket address to listen on
    pub bind_addr: String,
    /// Path receiving POSTed signals
    pub route: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            symbol: "ETH-USDC".to_string(),
            timeframe: Timeframe::FifteenMinutes,
            bar_limit: 100,
            atr_lookback: 14,
            stop_atr_mult: dec!(2.8),
            risk_fraction: dec!(0.02),     // 2% risk per trade
            sizing_mode: SizingMode::FixedRisk,
            quantity_decimals: 8,
            bind_addr: "0.0.0.0:5000".to_string(),
            route: "/tv".to_string(),
        }
    }
}

impl WebhookConfig {
    pub fn quote_asset(&self) -> &str {
        split_symbol(&self.symbol).map(|(_, q)| q).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        split_symbol(&self.symbol)?;

        if self.risk_fraction <= Decimal::ZERO || self.risk_fraction > Decimal::ONE {
            return Err(ConfigError::RiskFraction(self.risk_fraction));
        }
        if self.atr_lookback == 0 {
            return Err(ConfigError::ZeroLength("ATR lookback"));
        }
        if self.stop_atr_mult <= Decimal::ZERO {
            return Err(ConfigError::NonPositive {
                name: "stop ATR multiplier",
                value: self.stop_atr_mult,
            });
        }
        if self.bar_limit < self.atr_lookback + 1 {
            return Err(ConfigError::BarLimit {
                limit: self.bar_limit,
                required: self.atr_lookback + 1,
            });
        }
        Ok(())
    }
}

fn split_symbol(symbol: &str) -> Result<(&str, &str), ConfigError> {
    match symbol.split_once('-') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('-') => {
            Ok((base, quote))
        }
        _ => Err(ConfigError::Symbol(symbol.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(WebhookConfig::default().validate().is_ok());
    }

    #[test]
    fn test_assets_from_symbol() {
        let config = EngineConfig::default();
        assert_eq!(config.base_asset(), "ETH");
        assert_eq!(config.quote_asset(), "USDC");
        assert_eq!(WebhookConfig::default().quote_asset(), "USDC");
    }

    #[test]
    fn test_rejects_bad_risk_fraction() {
        for fraction in [dec!(0), dec!(-0.1), dec!(1.5)] {
            let config = EngineConfig {
                risk: RiskConfig {
                    risk_fraction: fraction,
                    ..Default::default()
                },
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::RiskFraction(fraction)));
        }

        let full = EngineConfig {
            risk: RiskConfig {
                risk_fraction: dec!(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_rejects_span_ordering() {
        let config = EngineConfig {
            trend: TrendConfig {
                fast_span: 30,
                slow_span: 10,
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::SpanOrdering { fast: 30, slow: 10 })
        );
    }

    #[test]
    fn test_rejects_short_bar_limit_and_bad_symbol() {
        let config = EngineConfig {
            bar_limit: 20,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::BarLimit { limit: 20, required: 30 })
        );

        let config = EngineConfig {
            symbol: "ETHUSDC".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Symbol(_))));
    }

    #[test]
    fn test_rejects_non_positive_multiplier() {
        let config = EngineConfig {
            risk: RiskConfig {
                trail_atr_mult: dec!(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name: "trail ATR multiplier", .. })
        ));
    }
}
