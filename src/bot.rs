//! Poll driver: fetch bars, decide, execute, sleep.
//!
//! Each tick runs one decision cycle to completion. A failed cycle is
//! classified, logged, and counted; it never stops the loop and never
//! mutates the position.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, CycleError, SizingError};
use crate::exchange::{ExecutionGateway, MarketData};
use crate::models::{Fill, IntentAction, OrderIntent, PositionSide};
use crate::trading::{Decision, EngineConfig, ExitSizing, IdleReason, MarketSnapshot, PositionEngine};

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Idle(IdleReason),
    Filled { intent: OrderIntent, fill: Fill },
    /// Exit with nothing left to sell; state reset without an order
    Flattened,
}

/// Stops a running bot once its in-flight cycle is done.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Main bot runner.
pub struct Bot<M, G> {
    engine: PositionEngine,
    market: Arc<M>,
    gateway: Arc<G>,
    dry_run: bool,
    stats: BotStats,

    // Shutdown signal
    stop: StopHandle,
}

impl<M: MarketData, G: ExecutionGateway> Bot<M, G> {
    /// Create a bot with a flat engine. Fails on invalid configuration.
    pub fn new(config: EngineConfig, market: Arc<M>, gateway: Arc<G>, dry_run: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: PositionEngine::new(config)?,
            market,
            gateway,
            dry_run,
            stats: BotStats::default(),
            stop: StopHandle {
                flag: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
            },
        })
    }

    /// Handle for external shutdown (Ctrl+C, tests).
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn engine(&self) -> &PositionEngine {
        &self.engine
    }

    pub fn stats(&self) -> &BotStats {
        &self.stats
    }

    /// Main run loop. Returns after `StopHandle::stop` once the in-flight
    /// cycle is done.
    pub async fn run(&mut self) -> Result<()> {
        let config = self.engine.config();
        info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            poll_interval = config.poll_interval_secs,
            dry_run = self.dry_run,
            "Starting poll loop"
        );

        let mut poll_interval = interval(Duration::from_secs(config.poll_interval_secs));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let wake = self.stop.wake.clone();
        while !self.stop.is_stopped() {
            tokio::select! {
                _ = poll_interval.tick() => {}
                _ = wake.notified() => continue,
            }

            let result = self.tick().await;
            self.record(&result);

            if let Err(e) = result {
                match &e {
                    CycleError::OrderExecutionFailed(_) => error!(kind = e.kind(), error = %e, "Cycle aborted"),
                    _ => warn!(kind = e.kind(), error = %e, "Cycle aborted"),
                }
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    /// Single decision cycle.
    pub async fn tick(&mut self) -> Result<CycleOutcome, CycleError> {
        let config = self.engine.config().clone();

        let bars = self
            .market
            .fetch_bars(&config.symbol, config.timeframe, config.bar_limit)
            .await
            .map_err(|e| CycleError::DataUnavailable(format!("{:#}", e)))?;
        let snapshot = MarketSnapshot::from_bars(&bars, &config)?;

        let (balance, balance_error) = match self.gateway.get_balance(config.quote_asset()).await {
            Ok(balance) => (Some(balance), None),
            Err(e) => (None, Some(format!("{:#}", e))),
        };

        let decision = self.engine.decide(&snapshot, balance);
        let position = self.engine.position();

        info!(
            price = %snapshot.price,
            atr = ?snapshot.volatility,
            trend = %snapshot.trend,
            position = %position.side(),
            adds = position.adds_done(),
            max_adds = position.max_adds(),
            avg_fill = ?position.average_fill_price(),
            balance = ?balance,
            decision = ?decision.intent().map(|i| i.to_string()),
            "Cycle"
        );

        match decision {
            Decision::Idle(IdleReason::VolatilityUndefined) => Err(CycleError::DataUnavailable(format!(
                "ATR undefined with {} bars (need {})",
                bars.len(),
                config.required_bars()
            ))),
            Decision::Idle(IdleReason::BalanceUnavailable) => Err(CycleError::BalanceUnavailable(
                balance_error.unwrap_or_else(|| "no balance".to_string()),
            )),
            Decision::Idle(IdleReason::Sizing(SizingError::NonPositiveBalance(balance))) => Err(
                CycleError::BalanceUnavailable(format!("non-positive {} balance {}", config.quote_asset(), balance)),
            ),
            Decision::Idle(reason) => {
                debug!(reason = %reason, "Idle cycle");
                Ok(CycleOutcome::Idle(reason))
            }
            Decision::Trade(intent) => self.execute(intent).await,
        }
    }

    /// Place the intent's order and commit the fill.
    async fn execute(&mut self, mut intent: OrderIntent) -> Result<CycleOutcome, CycleError> {
        let symbol = self.engine.config().symbol.clone();

        if intent.action == IntentAction::Exit {
            intent.quantity = self.exit_quantity(&intent).await;
            if intent.quantity <= Decimal::ZERO {
                warn!(side = %intent.side, "Exit triggered with nothing held");
                self.engine.flatten();
                return Ok(CycleOutcome::Flattened);
            }
        }

        info!(
            action = %intent.action,
            side = %intent.order_side(),
            quantity = %intent.quantity,
            price = %intent.reference_price,
            dry_run = self.dry_run,
            "Placing market order"
        );

        let fill = self
            .gateway
            .place_market_order(&symbol, intent.order_side(), intent.quantity)
            .await
            .map_err(|e| CycleError::OrderExecutionFailed(format!("{:#}", e)))?;

        self.engine.apply_fill(&intent, &fill)?;

        Ok(CycleOutcome::Filled { intent, fill })
    }

    /// Quantity to close: tracked fills, or the base balance for long exits
    /// when configured. Falls back to tracked if the balance read fails.
    async fn exit_quantity(&self, intent: &OrderIntent) -> Decimal {
        let config = self.engine.config();
        if config.exit_sizing != ExitSizing::Balance || intent.side != PositionSide::Long {
            return intent.quantity;
        }

        match self.gateway.get_balance(config.base_asset()).await {
            Ok(held) => held.round_dp_with_strategy(config.quantity_decimals, RoundingStrategy::ToZero),
            Err(e) => {
                warn!(error = %e, tracked = %intent.quantity, "Base balance unavailable; exiting tracked quantity");
                intent.quantity
            }
        }
    }

    fn record(&mut self, result: &Result<CycleOutcome, CycleError>) {
        self.stats.cycles += 1;
        match result {
            Ok(CycleOutcome::Idle(_)) => self.stats.idle_cycles += 1,
            Ok(CycleOutcome::Filled { intent, .. }) => {
                self.stats.fills += 1;
                match intent.action {
                    IntentAction::Enter => self.stats.entries += 1,
                    IntentAction::Add => self.stats.adds += 1,
                    IntentAction::Exit => self.stats.exits += 1,
                }
            }
            Ok(CycleOutcome::Flattened) => self.stats.exits += 1,
            Err(CycleError::DataUnavailable(_)) => self.stats.data_failures += 1,
            Err(CycleError::BalanceUnavailable(_)) => self.stats.balance_failures += 1,
            Err(CycleError::OrderExecutionFailed(_)) => self.stats.order_failures += 1,
        }
        self.stats.position = self.engine.position().side();
        self.stats.dry_run = self.dry_run;
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub cycles: u64,
    pub idle_cycles: u64,
    pub fills: u64,
    pub entries: u64,
    pub adds: u64,
    pub exits: u64,
    pub data_failures: u64,
    pub balance_failures: u64,
    pub order_failures: u64,
    pub position: PositionSide,
    pub dry_run: bool,
}

impl Default for BotStats {
    fn default() -> Self {
        Self {
            cycles: 0,
            idle_cycles: 0,
            fills: 0,
            entries: 0,
            adds: 0,
            exits: 0,
            data_failures: 0,
            balance_failures: 0,
            order_failures: 0,
            position: PositionSide::Flat,
            dry_run: false,
        }
    }
}

impl fmt::Display for BotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Cycles:          {} ({} idle)", self.cycles, self.idle_cycles)?;
        writeln!(f, "Fills:           {} (Entries: {}, Adds: {}, Exits: {})",
            self.fills, self.entries, self.adds, self.exits)?;
        writeln!(f, "Failures:        data {}, balance {}, orders {}",
            self.data_failures, self.balance_failures, self.order_failures)?;
        writeln!(f, "Position:        {} {}",
            self.position,
            if self.dry_run { "(Dry Run)" } else { "" })?;
        Ok(())
    }
}
