//! Data models for bars, orders, and position state.

mod bar;
mod order;
mod position;

pub use bar::{normalize_bars, Bar, Timeframe};
pub use order::{Fill, IntentAction, OrderIntent, OrderSide};
pub use position::{PositionSide, PositionState};
