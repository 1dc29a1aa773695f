//! Order sizing from balance, risk fraction, and volatility.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::SizingError;

use super::RiskConfig;

/// Position sizing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// A full stop-out loses exactly `risk_fraction` of balance
    FixedRisk,
    /// Spend `risk_fraction` of balance regardless of volatility
    FixedSpend,
}

impl FromStr for SizingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed_risk" | "fixed-risk" | "risk" | "atr" => Ok(Self::FixedRisk),
            "fixed_spend" | "fixed-spend" | "spend" => Ok(Self::FixedSpend),
            other => Err(format!(
                "unknown sizing mode '{}' (expected fixed_risk or fixed_spend)",
                other
            )),
        }
    }
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingMode::FixedRisk => f.write_str("fixed_risk"),
            SizingMode::FixedSpend => f.write_str("fixed_spend"),
        }
    }
}

/// ATR under this share of the price counts as no volatility in fixed-risk mode.
pub const MIN_VOLATILITY_RATIO: Decimal = dec!(0.0001);

/// quantity = (balance * risk_fraction) / (stop_mult * volatility)
pub fn fixed_risk_quantity(
    balance_quote: Decimal,
    risk_fraction: Decimal,
    volatility: Option<Decimal>,
    stop_mult: Decimal,
) -> Result<Decimal, SizingError> {
    let volatility = volatility.ok_or(SizingError::VolatilityUndefined)?;
    if volatility <= Decimal::ZERO {
        return Err(SizingError::NonPositiveVolatility(volatility));
    }

    let stop_distance = stop_mult * volatility;
    if stop_distance <= Decimal::ZERO {
        return Err(SizingError::NonPositiveVolatility(stop_distance));
    }

    (balance_quote * risk_fraction)
        .checked_div(stop_distance)
        .ok_or(SizingError::NonPositiveVolatility(stop_distance))
}

/// quantity = (balance * risk_fraction) / reference_price
pub fn fixed_spend_quantity(
    balance_quote: Decimal,
    risk_fraction: Decimal,
    reference_price: Decimal,
) -> Result<Decimal, SizingError> {
    if reference_price <= Decimal::ZERO {
        return Err(SizingError::NonPositivePrice(reference_price));
    }

    (balance_quote * risk_fraction)
        .checked_div(reference_price)
        .ok_or(SizingError::NonPositivePrice(reference_price))
}

/// Calculator for order quantities in base asset.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    mode: SizingMode,
    risk_fraction: Decimal,
    stop_atr_mult: Decimal,
    quantity_decimals: u32,
}

impl RiskSizer {
    pub fn new(mode: SizingMode, risk_fraction: Decimal, stop_atr_mult: Decimal, quantity_decimals: u32) -> Self {
        Self {
            mode,
            risk_fraction,
            stop_atr_mult,
            quantity_decimals,
        }
    }

    pub fn from_risk_config(config: &RiskConfig, quantity_decimals: u32) -> Self {
        Self::new(
            config.sizing_mode,
            config.risk_fraction,
            config.stop_atr_mult,
            quantity_decimals,
        )
    }

    /// Quantity for one entry or add, truncated to the configured precision.
    ///
    /// # Arguments
    /// * `balance_quote` - Account balance in quote currency
    /// * `volatility` - Latest ATR, `None` when undefined
    /// * `reference_price` - Price the order is expected to fill near
    pub fn size_order(
        &self,
        balance_quote: Decimal,
        volatility: Option<Decimal>,
        reference_price: Decimal,
    ) -> Result<Decimal, SizingError> {
        if balance_quote <= Decimal::ZERO {
            return Err(SizingError::NonPositiveBalance(balance_quote));
        }
        if reference_price <= Decimal::ZERO {
            return Err(SizingError::NonPositivePrice(reference_price));
        }

        let raw = match self.mode {
            SizingMode::FixedRisk => {
                if let Some(v) = volatility.filter(|v| *v > Decimal::ZERO) {
                    let floor = reference_price * MIN_VOLATILITY_RATIO;
                    if v < floor {
                        return Err(SizingError::VolatilityBelowFloor { volatility: v, floor });
                    }
                }
                let quantity =
                    fixed_risk_quantity(balance_quote, self.risk_fraction, volatility, self.stop_atr_mult)?;

                // never more than the balance can pay for
                quantity.min(balance_quote / reference_price)
            }
            SizingMode::FixedSpend => {
                fixed_spend_quantity(balance_quote, self.risk_fraction, reference_price)?
            }
        };

        let quantity = raw.round_dp_with_strategy(self.quantity_decimals, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(SizingError::BelowMinimum(raw));
        }

        Ok(quantity.normalize())
    }
}
