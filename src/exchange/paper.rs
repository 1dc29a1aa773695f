//! Simulated execution at the latest close.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{Fill, OrderSide, Timeframe};

use super::{ExecutionGateway, MarketData};

/// Paper venue: fills every market order in full at the latest close and
/// keeps simulated balances per asset.
pub struct PaperGateway<M> {
    market: Arc<M>,
    timeframe: Timeframe,
    balances: Mutex<HashMap<String, Decimal>>,
}

impl<M: MarketData> PaperGateway<M> {
    pub fn new(market: Arc<M>, timeframe: Timeframe, quote_asset: &str, starting_quote: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_string(), starting_quote);

        Self {
            market,
            timeframe,
            balances: Mutex::new(balances),
        }
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        let bars = self
            .market
            .fetch_bars(symbol, self.timeframe, 2)
            .await
            .context("Failed to fetch mark price")?;
        let close = bars.last().map(|b| b.close).ok_or_else(|| anyhow!("No bars to price against"))?;

        Decimal::try_from(close)
            .ok()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| anyhow!("Unusable mark price {}", close))
    }
}

#[async_trait]
impl<M: MarketData> ExecutionGateway for PaperGateway<M> {
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Fill> {
        if quantity <= Decimal::ZERO {
            bail!("Order quantity must be positive, got {}", quantity);
        }
        let (base, quote) = symbol
            .split_once('-')
            .ok_or_else(|| anyhow!("Symbol '{}' is not BASE-QUOTE", symbol))?;

        let price = self.mark_price(symbol).await?;
        let notional = quantity * price;

        let mut balances = self.balances.lock().await;
        let (debit_asset, debit, credit_asset, credit) = match side {
            OrderSide::Buy => (quote, notional, base, quantity),
            OrderSide::Sell => (base, quantity, quote, notional),
        };

        let available = balances.get(debit_asset).copied().unwrap_or(Decimal::ZERO);
        if available < debit {
            bail!(
                "Insufficient {} balance: need {}, have {}",
                debit_asset,
                debit,
                available
            );
        }

        *balances.entry(debit_asset.to_string()).or_insert(Decimal::ZERO) -= debit;
        *balances.entry(credit_asset.to_string()).or_insert(Decimal::ZERO) += credit;

        let fill = Fill {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            side,
            filled_quantity: quantity,
            average_price: price,
        };

        info!(
            order_id = %fill.order_id,
            side = %side,
            quantity = %quantity,
            price = %price,
            "[PAPER] Order filled"
        );

        Ok(fill)
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        let balances = self.balances.lock().await;
        Ok(balances.get(asset).copied().unwrap_or(Decimal::ZERO))
    }
}
