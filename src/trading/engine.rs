//! Position & risk decision engine.
//!
//! Turns one market snapshot into at most one sized intent:
//! - FLAT: enter in the direction of the trend signal
//! - LONG/SHORT: exit on the ATR trailing stop, otherwise pyramid once the
//!   price has moved `add_step_atr_mult` ATRs past the last add
//!
//! `decide` never mutates. State changes only through `apply_fill`, after the
//! gateway has confirmed an execution.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{ConfigError, CycleError, SizingError};
use crate::indicators::{self, TrendSignal};
use crate::models::{Bar, Fill, IntentAction, OrderIntent, PositionSide, PositionState};

use super::{EngineConfig, RiskSizer};

/// Everything one decision needs from the latest bars.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Latest close
    pub price: Decimal,
    /// ATR, `None` when the series is too short
    pub volatility: Option<Decimal>,
    /// Highest high over the ATR lookback
    pub recent_high: Option<Decimal>,
    /// Lowest low over the ATR lookback
    pub recent_low: Option<Decimal>,
    pub trend: TrendSignal,
}

impl MarketSnapshot {
    /// Compute indicators over `bars` (ascending). Fails only when there is
    /// no usable latest price; short series give undefined indicators instead.
    pub fn from_bars(bars: &[Bar], config: &EngineConfig) -> Result<Self, CycleError> {
        let last = bars
            .last()
            .ok_or_else(|| CycleError::DataUnavailable("no bars returned".to_string()))?;

        let price = to_decimal(last.close)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| CycleError::DataUnavailable(format!("unusable close {}", last.close)))?;

        let lookback = config.risk.atr_lookback;

        Ok(Self {
            timestamp: last.timestamp,
            price,
            volatility: indicators::atr(bars, lookback).and_then(to_decimal),
            recent_high: indicators::highest_high(bars, lookback).and_then(to_decimal),
            recent_low: indicators::lowest_low(bars, lookback).and_then(to_decimal),
            trend: indicators::trend_signal(bars, config.trend.fast_span, config.trend.slow_span),
        })
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::try_from(value).ok()
}

/// Why a cycle produced no intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleReason {
    VolatilityUndefined,
    NoSignal,
    ShortDisabled,
    NoCondition,
    MaxAddsReached,
    BalanceUnavailable,
    Sizing(SizingError),
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::VolatilityUndefined => f.write_str("volatility undefined"),
            IdleReason::NoSignal => f.write_str("no trend signal"),
            IdleReason::ShortDisabled => f.write_str("short signal but shorting disabled"),
            IdleReason::NoCondition => f.write_str("no add or exit condition"),
            IdleReason::MaxAddsReached => f.write_str("max adds reached"),
            IdleReason::BalanceUnavailable => f.write_str("balance unavailable"),
            IdleReason::Sizing(e) => write!(f, "sizing declined: {}", e),
        }
    }
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Idle(IdleReason),
    Trade(OrderIntent),
}

impl Decision {
    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            Decision::Trade(intent) => Some(intent),
            Decision::Idle(_) => None,
        }
    }
}

/// One engine per instrument; owns the only position state.
#[derive(Debug, Clone)]
pub struct PositionEngine {
    config: EngineConfig,
    sizer: RiskSizer,
    position: PositionState,
}

impl PositionEngine {
    /// Build a flat engine. Refuses invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sizer = RiskSizer::from_risk_config(&config.risk, config.quantity_decimals);
        let position = PositionState::flat(config.risk.max_adds);

        Ok(Self {
            config,
            sizer,
            position,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    /// Protective stop for the held side, recomputed from the current inputs.
    ///
    /// Long: max(entry - stop_mult*ATR, recent_high - trail_mult*ATR).
    /// Short: min(entry + stop_mult*ATR, recent_low + trail_mult*ATR).
    pub fn stop_level(&self, snapshot: &MarketSnapshot) -> Option<Decimal> {
        let volatility = snapshot.volatility?;
        let entry = self.position.base_entry_price()?;
        let risk = &self.config.risk;

        match self.position.side() {
            PositionSide::Long => {
                let initial = entry - risk.stop_atr_mult * volatility;
                let trailing = snapshot
                    .recent_high
                    .map(|high| high - risk.trail_atr_mult * volatility);
                Some(trailing.map_or(initial, |t| initial.max(t)))
            }
            PositionSide::Short => {
                let initial = entry + risk.stop_atr_mult * volatility;
                let trailing = snapshot
                    .recent_low
                    .map(|low| low + risk.trail_atr_mult * volatility);
                Some(trailing.map_or(initial, |t| initial.min(t)))
            }
            PositionSide::Flat => None,
        }
    }

    /// Price at which the next pyramid add triggers.
    pub fn next_add_level(&self, snapshot: &MarketSnapshot) -> Option<Decimal> {
        let volatility = snapshot.volatility?;
        let last_add = self.position.last_add_price()?;
        let step = self.config.risk.add_step_atr_mult * volatility;

        match self.position.side() {
            PositionSide::Long => Some(last_add + step),
            PositionSide::Short => Some(last_add - step),
            PositionSide::Flat => None,
        }
    }

    /// Decide the next action. Pure: the same inputs and state always give
    /// the same decision.
    ///
    /// `balance_quote` is `None` when the balance could not be read; that
    /// blocks entries and adds but never exits.
    pub fn decide(&self, snapshot: &MarketSnapshot, balance_quote: Option<Decimal>) -> Decision {
        let Some(volatility) = snapshot.volatility else {
            return Decision::Idle(IdleReason::VolatilityUndefined);
        };

        let side = self.position.side();
        if side == PositionSide::Flat {
            let direction = match snapshot.trend {
                TrendSignal::Long => PositionSide::Long,
                TrendSignal::Short if self.config.allow_short => PositionSide::Short,
                TrendSignal::Short => return Decision::Idle(IdleReason::ShortDisabled),
                TrendSignal::None => return Decision::Idle(IdleReason::NoSignal),
            };
            return self.sized(IntentAction::Enter, direction, snapshot, volatility, balance_quote);
        }

        // Exit first; it suppresses any add this cycle
        if let Some(stop) = self.stop_level(snapshot) {
            let stopped = match side {
                PositionSide::Long => snapshot.price <= stop,
                _ => snapshot.price >= stop,
            };
            if stopped {
                return Decision::Trade(OrderIntent {
                    action: IntentAction::Exit,
                    side,
                    quantity: self.position.quantity(),
                    reference_price: snapshot.price,
                });
            }
        }

        if !self.position.can_add() {
            return Decision::Idle(IdleReason::MaxAddsReached);
        }

        let add_due = match (side, self.next_add_level(snapshot)) {
            (PositionSide::Long, Some(level)) => snapshot.price >= level,
            (PositionSide::Short, Some(level)) => snapshot.price <= level,
            _ => false,
        };
        if add_due {
            return self.sized(IntentAction::Add, side, snapshot, volatility, balance_quote);
        }

        Decision::Idle(IdleReason::NoCondition)
    }

    fn sized(
        &self,
        action: IntentAction,
        side: PositionSide,
        snapshot: &MarketSnapshot,
        volatility: Decimal,
        balance_quote: Option<Decimal>,
    ) -> Decision {
        let Some(balance) = balance_quote else {
            return Decision::Idle(IdleReason::BalanceUnavailable);
        };

        match self.sizer.size_order(balance, Some(volatility), snapshot.price) {
            Ok(quantity) => Decision::Trade(OrderIntent {
                action,
                side,
                quantity,
                reference_price: snapshot.price,
            }),
            Err(e) => Decision::Idle(IdleReason::Sizing(e)),
        }
    }

    /// Commit a confirmed fill for an intent produced by `decide`.
    ///
    /// Entry and add anchor the pyramid ladder at the intent's reference
    /// price; the fill price only feeds the average. An empty fill is not a
    /// confirmation and leaves the state unchanged.
    pub fn apply_fill(&mut self, intent: &OrderIntent, fill: &Fill) -> Result<(), CycleError> {
        if !fill.is_filled() {
            return Err(CycleError::OrderExecutionFailed(format!(
                "order {} reported no fill",
                fill.order_id
            )));
        }

        let side = self.position.side();
        match intent.action {
            IntentAction::Enter if side == PositionSide::Flat => {
                self.position.open(
                    intent.side,
                    intent.reference_price,
                    fill.filled_quantity,
                    fill.average_price,
                );
                info!(
                    side = %intent.side,
                    entry = %intent.reference_price,
                    quantity = %fill.filled_quantity,
                    "Position opened"
                );
            }
            IntentAction::Add if side == intent.side => {
                self.position
                    .add(intent.reference_price, fill.filled_quantity, fill.average_price);
                info!(
                    side = %intent.side,
                    price = %intent.reference_price,
                    adds_done = self.position.adds_done(),
                    quantity = %self.position.quantity(),
                    "Position added"
                );
            }
            IntentAction::Exit if side == intent.side => {
                if fill.filled_quantity < intent.quantity {
                    warn!(
                        requested = %intent.quantity,
                        filled = %fill.filled_quantity,
                        "Exit partially filled; flattening anyway"
                    );
                }
                self.position.reset();
                info!(side = %intent.side, price = %fill.average_price, "Position closed");
            }
            _ => {
                warn!(
                    action = %intent.action,
                    intent_side = %intent.side,
                    position_side = %side,
                    "Fill does not match position state; ignored"
                );
            }
        }

        Ok(())
    }

    /// Drop a position with nothing left to sell.
    pub fn flatten(&mut self) {
        if !self.position.is_flat() {
            warn!(side = %self.position.side(), "Flattening position without an order");
        }
        self.position.reset();
    }
}
