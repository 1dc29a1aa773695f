//! Test doubles for the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use crate::models::{Bar, Fill, OrderSide, Timeframe};

use super::{ExecutionGateway, MarketData};

/// Bars one minute apart with a one-unit range around each close.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
            Bar::new(ts, c, c + 1.0, c - 1.0, c, 10.0)
        })
        .collect()
}

/// Market data returning whatever bars were last scripted.
pub struct ScriptedMarket {
    bars: Mutex<Vec<Bar>>,
    fail: AtomicBool,
}

impl ScriptedMarket {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars: Mutex::new(bars),
            fail: AtomicBool::new(false),
        }
    }

    pub fn from_closes(closes: &[f64]) -> Self {
        Self::new(bars_from_closes(closes))
    }

    pub fn set_bars(&self, bars: Vec<Bar>) {
        *self.bars.lock().unwrap() = bars;
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn fetch_bars(&self, _symbol: &str, _timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("scripted market data outage");
        }
        let bars = self.bars.lock().unwrap();
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }
}

/// Gateway that records orders and fills them at a fixed price.
pub struct RecordingGateway {
    pub orders: Mutex<Vec<(OrderSide, Decimal)>>,
    balances: Mutex<HashMap<String, Decimal>>,
    fill_price: Mutex<Decimal>,
    fail_orders: AtomicBool,
    fail_balance: AtomicBool,
}

impl RecordingGateway {
    pub fn new(fill_price: Decimal) -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            balances: Mutex::new(HashMap::new()),
            fill_price: Mutex::new(fill_price),
            fail_orders: AtomicBool::new(false),
            fail_balance: AtomicBool::new(false),
        }
    }

    pub fn with_balance(self, asset: &str, amount: Decimal) -> Self {
        self.balances.lock().unwrap().insert(asset.to_string(), amount);
        self
    }

    pub fn set_fill_price(&self, price: Decimal) {
        *self.fill_price.lock().unwrap() = price;
    }

    pub fn set_failing_orders(&self, failing: bool) {
        self.fail_orders.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_balance(&self, failing: bool) {
        self.fail_balance.store(failing, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutionGateway for RecordingGateway {
    async fn place_market_order(&self, _symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Fill> {
        if self.fail_orders.load(Ordering::SeqCst) {
            bail!("scripted order rejection");
        }
        let mut orders = self.orders.lock().unwrap();
        orders.push((side, quantity));

        Ok(Fill {
            order_id: format!("order-{}", orders.len()),
            side,
            filled_quantity: quantity,
            average_price: *self.fill_price.lock().unwrap(),
        })
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        if self.fail_balance.load(Ordering::SeqCst) {
            bail!("scripted balance outage");
        }
        Ok(self.balances.lock().unwrap().get(asset).copied().unwrap_or(Decimal::ZERO))
    }
}
