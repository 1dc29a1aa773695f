//! Order intents emitted by the engine and fills reported by the gateway.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Side of a market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    /// Case-insensitive; anything but buy/sell is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("Invalid side: {}", other)),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confirmed execution of a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub side: OrderSide,
    pub filled_quantity: Decimal,
    pub average_price: Decimal,
}

impl Fill {
    /// Whether anything was actually executed.
    pub fn is_filled(&self) -> bool {
        self.filled_quantity > Decimal::ZERO
    }
}

/// What an intent does to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentAction {
    Enter,
    Add,
    Exit,
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentAction::Enter => "enter",
            IntentAction::Add => "add",
            IntentAction::Exit => "exit",
        };
        f.write_str(s)
    }
}

/// A sized trade decision. Performs no I/O by itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub action: IntentAction,
    /// Position side the intent applies to (never `Flat`)
    pub side: PositionSide,
    /// Quantity in base asset
    pub quantity: Decimal,
    /// Price the decision was taken at
    pub reference_price: Decimal,
}

impl OrderIntent {
    /// Market order side needed to carry out this intent.
    pub fn order_side(&self) -> OrderSide {
        match (self.action, self.side) {
            (IntentAction::Exit, PositionSide::Long) => OrderSide::Sell,
            (IntentAction::Exit, _) => OrderSide::Buy,
            (_, PositionSide::Short) => OrderSide::Sell,
            (_, _) => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {}",
            self.action, self.side, self.quantity, self.reference_price
        )
    }
}
