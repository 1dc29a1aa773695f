//! Wire types for the Coinbase Exchange REST API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One candle row: `[time, low, high, open, close, volume]`.
pub type CandleRow = [f64; 6];

/// Entry from `GET /accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub currency: String,
    pub balance: Decimal,
}

/// Body of `POST /orders` for a market order sized in base units.
#[derive(Debug, Clone, Serialize)]
pub struct MarketOrderRequest {
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub side: &'static str,
    pub product_id: String,
    pub size: String,
    pub client_oid: String,
}

/// Order as returned by `POST /orders` and `GET /orders/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub settled: bool,
    #[serde(default)]
    pub filled_size: Option<Decimal>,
    #[serde(default)]
    pub executed_value: Option<Decimal>,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

impl OrderResponse {
    pub fn is_rejected(&self) -> bool {
        self.status == "rejected"
    }

    pub fn is_final(&self) -> bool {
        self.status == "done" && self.settled
    }

    pub fn filled(&self) -> Decimal {
        self.filled_size.unwrap_or(Decimal::ZERO)
    }

    /// executed_value / filled_size, zero when nothing filled.
    pub fn average_price(&self) -> Decimal {
        let filled = self.filled();
        if filled.is_zero() {
            return Decimal::ZERO;
        }
        self.executed_value.unwrap_or(Decimal::ZERO) / filled
    }
}

/// Error body returned on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
