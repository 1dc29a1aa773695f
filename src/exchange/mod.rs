//! Collaborator contracts the engine drives, plus a paper venue.
//!
//! Every call is awaited to completion before the cycle moves on. Timeouts
//! belong to the implementations.

mod paper;
#[cfg(test)]
pub mod testing;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Bar, Fill, OrderSide, Timeframe};

pub use paper::PaperGateway;

/// Source of OHLCV bars.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `limit` most recent bars, ascending by timestamp, no duplicates.
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>>;
}

/// Order placement and account balances.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Place a market order and wait for its fill confirmation.
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Fill>;

    /// Total balance held in `asset`.
    async fn get_balance(&self, asset: &str) -> Result<Decimal>;
}
