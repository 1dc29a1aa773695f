//! Classified failures for decision cycles, sizing, and configuration.

use rust_decimal::Decimal;
use thiserror::Error;

/// Why a decision cycle was aborted. Position state is untouched in every case.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Bars missing or too short for the configured indicators.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// Account balance could not be read.
    #[error("balance unavailable: {0}")]
    BalanceUnavailable(String),

    /// Gateway error, rejection, or an order that did not fill.
    #[error("order execution failed: {0}")]
    OrderExecutionFailed(String),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::DataUnavailable(_) => "data_unavailable",
            CycleError::BalanceUnavailable(_) => "balance_unavailable",
            CycleError::OrderExecutionFailed(_) => "order_execution_failed",
        }
    }
}

/// Reasons the risk sizer declines to produce a quantity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingError {
    #[error("volatility is undefined")]
    VolatilityUndefined,

    #[error("volatility must be positive, got {0}")]
    NonPositiveVolatility(Decimal),

    #[error("volatility {volatility} is below the floor {floor}")]
    VolatilityBelowFloor { volatility: Decimal, floor: Decimal },

    #[error("reference price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("balance must be positive, got {0}")]
    NonPositiveBalance(Decimal),

    #[error("quantity {0} rounds to zero")]
    BelowMinimum(Decimal),
}

/// Invalid startup configuration. Fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("risk fraction must be in (0, 1], got {0}")]
    RiskFraction(Decimal),

    #[error("fast EMA span ({fast}) must be smaller than slow span ({slow})")]
    SpanOrdering { fast: usize, slow: usize },

    #[error("{0} must be at least 1")]
    ZeroLength(&'static str),

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: Decimal },

    #[error("bar limit {limit} is below the {required} bars the indicators need")]
    BarLimit { limit: usize, required: usize },

    #[error("symbol '{0}' must look like BASE-QUOTE")]
    Symbol(String),
}
