//! Position state owned by the decision engine.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of the held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::Flat => "flat",
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        };
        f.write_str(s)
    }
}

/// The single mutable state of one engine instance.
///
/// Fields are read through accessors; only the engine holds a mutable
/// reference, and it mutates only after a confirmed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    side: PositionSide,
    base_entry_price: Option<Decimal>,
    last_add_price: Option<Decimal>,
    adds_done: u32,
    max_adds: u32,
    /// Base quantity held, summed from confirmed fills
    quantity: Decimal,
    /// Volume-weighted fill price across entry and adds
    average_fill_price: Option<Decimal>,
}

impl PositionState {
    /// A flat position allowing up to `max_adds` pyramid adds.
    pub fn flat(max_adds: u32) -> Self {
        Self {
            side: PositionSide::Flat,
            base_entry_price: None,
            last_add_price: None,
            adds_done: 0,
            max_adds,
            quantity: Decimal::ZERO,
            average_fill_price: None,
        }
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    pub fn base_entry_price(&self) -> Option<Decimal> {
        self.base_entry_price
    }

    pub fn last_add_price(&self) -> Option<Decimal> {
        self.last_add_price
    }

    pub fn adds_done(&self) -> u32 {
        self.adds_done
    }

    pub fn max_adds(&self) -> u32 {
        self.max_adds
    }

    pub fn can_add(&self) -> bool {
        self.adds_done < self.max_adds
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn average_fill_price(&self) -> Option<Decimal> {
        self.average_fill_price
    }

    /// Open a new position anchored at `anchor_price`.
    pub(crate) fn open(&mut self, side: PositionSide, anchor_price: Decimal, quantity: Decimal, fill_price: Decimal) {
        self.side = side;
        self.base_entry_price = Some(anchor_price);
        self.last_add_price = Some(anchor_price);
        self.adds_done = 0;
        self.quantity = quantity;
        self.average_fill_price = Some(fill_price);
    }

    /// Record one pyramid add. Never pushes `adds_done` past `max_adds`.
    pub(crate) fn add(&mut self, anchor_price: Decimal, quantity: Decimal, fill_price: Decimal) {
        let new_quantity = self.quantity + quantity;
        if !new_quantity.is_zero() {
            let prior_cost = self.quantity * self.average_fill_price.unwrap_or(fill_price);
            self.average_fill_price = Some((prior_cost + quantity * fill_price) / new_quantity);
        }

        self.quantity = new_quantity;
        self.last_add_price = Some(anchor_price);
        self.adds_done = (self.adds_done + 1).min(self.max_adds);
    }

    /// Back to flat.
    pub(crate) fn reset(&mut self) {
        *self = Self::flat(self.max_adds);
    }
}
