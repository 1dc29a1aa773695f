//! Flywheel
//!
//! Single-instrument trend follower: enters on an EMA cross, sizes from the
//! account balance and ATR, pyramids into strength and exits on an ATR
//! trailing stop. Also serves a webhook for externally triggered orders.

mod api;
mod bot;
mod error;
mod exchange;
mod indicators;
mod models;
mod trading;
mod webhook;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{CoinbaseClient, Credentials};
use crate::bot::Bot;
use crate::exchange::{ExecutionGateway, MarketData, PaperGateway};
use crate::models::Timeframe;
use crate::trading::{EngineConfig, ExitSizing, MarketSnapshot, SizingMode, WebhookConfig};
use crate::webhook::WebhookDesk;

/// ATR trend-following bot CLI.
#[derive(Parser)]
#[command(name = "flywheel")]
#[command(about = "ATR-sized trend following with pyramiding and a trailing stop", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", env = "FLYWHEEL_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the polling bot
    Run {
        #[command(flatten)]
        engine: EngineArgs,

        /// Simulate fills at the latest close instead of trading
        #[arg(long, env = "FLYWHEEL_DRY_RUN")]
        dry_run: bool,

        /// Starting quote balance for the dry run
        #[arg(long, default_value = "1000", env = "FLYWHEEL_PAPER_BALANCE")]
        paper_balance: Decimal,
    },

    /// Serve the signal webhook
    Serve {
        #[command(flatten)]
        webhook: WebhookArgs,

        /// Simulate fills at the latest close instead of trading
        #[arg(long, env = "FLYWHEEL_DRY_RUN")]
        dry_run: bool,

        /// Starting quote balance for the dry run
        #[arg(long, default_value = "1000", env = "FLYWHEEL_PAPER_BALANCE")]
        paper_balance: Decimal,
    },

    /// Fetch bars once and print the indicators
    Indicators {
        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Poll engine overrides; unset flags keep the defaults.
#[derive(Args)]
struct EngineArgs {
    /// Product id, BASE-QUOTE
    #[arg(long, env = "FLYWHEEL_SYMBOL")]
    symbol: Option<String>,

    /// Bar timeframe (1m, 5m, 15m, 1h, 6h, 1d)
    #[arg(long, env = "FLYWHEEL_TIMEFRAME")]
    timeframe: Option<Timeframe>,

    /// Bars fetched per cycle
    #[arg(long, env = "FLYWHEEL_BAR_LIMIT")]
    bar_limit: Option<usize>,

    /// Fraction of the quote balance committed per order
    #[arg(long, env = "FLYWHEEL_RISK_FRACTION")]
    risk_fraction: Option<Decimal>,

    #[arg(long, env = "FLYWHEEL_ATR_LOOKBACK")]
    atr_lookback: Option<usize>,

    #[arg(long, env = "FLYWHEEL_STOP_ATR_MULT")]
    stop_atr_mult: Option<Decimal>,

    #[arg(long, env = "FLYWHEEL_TRAIL_ATR_MULT")]
    trail_atr_mult: Option<Decimal>,

    #[arg(long, env = "FLYWHEEL_ADD_STEP_ATR_MULT")]
    add_step_atr_mult: Option<Decimal>,

    #[arg(long, env = "FLYWHEEL_MAX_ADDS")]
    max_adds: Option<u32>,

    /// fixed_risk or fixed_spend
    #[arg(long, env = "FLYWHEEL_SIZING_MODE")]
    sizing_mode: Option<SizingMode>,

    #[arg(long, env = "FLYWHEEL_FAST_SPAN")]
    fast_span: Option<usize>,

    #[arg(long, env = "FLYWHEEL_SLOW_SPAN")]
    slow_span: Option<usize>,

    /// Trade the short side as well
    #[arg(long, env = "FLYWHEEL_ALLOW_SHORT")]
    allow_short: bool,

    /// tracked or balance
    #[arg(long, env = "FLYWHEEL_EXIT_SIZING")]
    exit_sizing: Option<ExitSizing>,

    #[arg(long, env = "FLYWHEEL_QUANTITY_DECIMALS")]
    quantity_decimals: Option<u32>,

    /// Seconds between cycles
    #[arg(long, env = "FLYWHEEL_POLL_INTERVAL")]
    poll_interval: Option<u64>,
}

impl EngineArgs {
    fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::default();

        if let Some(v) = self.symbol { config.symbol = v; }
        if let Some(v) = self.timeframe { config.timeframe = v; }
        if let Some(v) = self.bar_limit { config.bar_limit = v; }
        if let Some(v) = self.risk_fraction { config.risk.risk_fraction = v; }
        if let Some(v) = self.atr_lookback { config.risk.atr_lookback = v; }
        if let Some(v) = self.stop_atr_mult { config.risk.stop_atr_mult = v; }
        if let Some(v) = self.trail_atr_mult { config.risk.trail_atr_mult = v; }
        if let Some(v) = self.add_step_atr_mult { config.risk.add_step_atr_mult = v; }
        if let Some(v) = self.max_adds { config.risk.max_adds = v; }
        if let Some(v) = self.sizing_mode { config.risk.sizing_mode = v; }
        if let Some(v) = self.fast_span { config.trend.fast_span = v; }
        if let Some(v) = self.slow_span { config.trend.slow_span = v; }
        if let Some(v) = self.exit_sizing { config.exit_sizing = v; }
        if let Some(v) = self.quantity_decimals { config.quantity_decimals = v; }
        if let Some(v) = self.poll_interval { config.poll_interval_secs = v; }
        config.allow_short = self.allow_short;

        config
    }
}

/// Webhook profile overrides; unset flags keep the defaults.
#[derive(Args)]
struct WebhookArgs {
    #[arg(long, env = "FLYWHEEL_SYMBOL")]
    symbol: Option<String>,

    #[arg(long, env = "FLYWHEEL_WEBHOOK_TIMEFRAME")]
    timeframe: Option<Timeframe>,

    #[arg(long, env = "FLYWHEEL_WEBHOOK_BAR_LIMIT")]
    bar_limit: Option<usize>,

    #[arg(long, env = "FLYWHEEL_WEBHOOK_RISK_FRACTION")]
    risk_fraction: Option<Decimal>,

    #[arg(long, env = "FLYWHEEL_WEBHOOK_ATR_LOOKBACK")]
    atr_lookback: Option<usize>,

    #[arg(long, env = "FLYWHEEL_WEBHOOK_STOP_ATR_MULT")]
    stop_atr_mult: Option<Decimal>,

    /// fixed_risk or fixed_spend
    #[arg(long, env = "FLYWHEEL_WEBHOOK_SIZING_MODE")]
    sizing_mode: Option<SizingMode>,

    #[arg(long, env = "FLYWHEEL_QUANTITY_DECIMALS")]
    quantity_decimals: Option<u32>,

    /// Listen address
    #[arg(long, env = "FLYWHEEL_BIND")]
    bind: Option<String>,

    /// Signal path
    #[arg(long, env = "FLYWHEEL_ROUTE")]
    route: Option<String>,
}

impl WebhookArgs {
    fn into_config(self) -> WebhookConfig {
        let mut config = WebhookConfig::default();

        if let Some(v) = self.symbol { config.symbol = v; }
        if let Some(v) = self.timeframe { config.timeframe = v; }
        if let Some(v) = self.bar_limit { config.bar_limit = v; }
        if let Some(v) = self.risk_fraction { config.risk_fraction = v; }
        if let Some(v) = self.atr_lookback { config.atr_lookback = v; }
        if let Some(v) = self.stop_atr_mult { config.stop_atr_mult = v; }
        if let Some(v) = self.sizing_mode { config.sizing_mode = v; }
        if let Some(v) = self.quantity_decimals { config.quantity_decimals = v; }
        if let Some(v) = self.bind { config.bind_addr = v; }
        if let Some(v) = self.route { config.route = v; }

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            engine,
            dry_run,
            paper_balance,
        } => {
            let config = engine.into_config();
            config.validate().context("Invalid engine configuration")?;

            if dry_run {
                let market = Arc::new(CoinbaseClient::new(Credentials::from_env().ok())?);
                let gateway = Arc::new(PaperGateway::new(
                    market.clone(),
                    config.timeframe,
                    config.quote_asset(),
                    paper_balance,
                ));
                run_bot(config, market, gateway, true).await?;
            } else {
                let credentials = Credentials::from_env().context("Live trading needs exchange credentials")?;
                let client = Arc::new(CoinbaseClient::new(Some(credentials))?);
                run_bot(config, client.clone(), client, false).await?;
            }
        }

        Commands::Serve {
            webhook,
            dry_run,
            paper_balance,
        } => {
            let config = webhook.into_config();
            config.validate().context("Invalid webhook configuration")?;

            if dry_run {
                let market = Arc::new(CoinbaseClient::new(Credentials::from_env().ok())?);
                let gateway = Arc::new(PaperGateway::new(
                    market.clone(),
                    config.timeframe,
                    config.quote_asset(),
                    paper_balance,
                ));
                serve_webhook(config, market, gateway, true).await?;
            } else {
                let credentials = Credentials::from_env().context("Live trading needs exchange credentials")?;
                let client = Arc::new(CoinbaseClient::new(Some(credentials))?);
                serve_webhook(config, client.clone(), client, false).await?;
            }
        }

        Commands::Indicators { engine } => {
            let config = engine.into_config();
            config.validate().context("Invalid engine configuration")?;

            let client = CoinbaseClient::new(None)?;
            print_indicators(&config, &client).await?;
        }

        Commands::Config { engine } => {
            let config = engine.into_config();
            print_config(&config);
            if let Err(e) = config.validate() {
                warn!(error = %e, "Configuration is invalid");
            }
        }
    }

    Ok(())
}

async fn run_bot<M, G>(config: EngineConfig, market: Arc<M>, gateway: Arc<G>, dry_run: bool) -> Result<()>
where
    M: MarketData,
    G: ExecutionGateway,
{
    println!("\n=== Flywheel ===");
    println!("Symbol:           {} ({})", config.symbol, config.timeframe);
    println!("Polling interval: {}s", config.poll_interval_secs);
    println!("Sizing:           {} @ {}", config.risk.sizing_mode, config.risk.risk_fraction);
    println!("Mode:             {}", if dry_run { "DRY RUN (paper fills)" } else { "LIVE TRADING" });
    println!("\nPress Ctrl+C to stop.\n");

    let mut bot = Bot::new(config, market, gateway, dry_run)?;

    // Register shutdown handler
    let stop = bot.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        stop.stop();
    });

    if let Err(e) = bot.run().await {
        tracing::error!(error = %e, "Bot error");
    }

    let position = bot.engine().position();
    if !position.is_flat() {
        warn!(
            side = %position.side(),
            quantity = %position.quantity(),
            entry = ?position.base_entry_price(),
            "Stopped with an open position"
        );
    }

    // Show final stats
    println!("\n{}", bot.stats());
    Ok(())
}

async fn serve_webhook<M, G>(config: WebhookConfig, market: Arc<M>, gateway: Arc<G>, dry_run: bool) -> Result<()>
where
    M: MarketData + 'static,
    G: ExecutionGateway + 'static,
{
    info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe,
        sizing = %config.sizing_mode,
        dry_run = dry_run,
        "Starting webhook server"
    );

    let desk = Arc::new(WebhookDesk::new(config, market, gateway)?);
    webhook::serve(desk).await
}

async fn print_indicators<M: MarketData>(config: &EngineConfig, market: &M) -> Result<()> {
    let bars = market
        .fetch_bars(&config.symbol, config.timeframe, config.bar_limit)
        .await
        .context("Failed to fetch bars")?;
    let snapshot = MarketSnapshot::from_bars(&bars, config)?;
    let emas = indicators::latest_emas(&bars, config.trend.fast_span, config.trend.slow_span);

    println!("\n=== {} {} ({} bars) ===\n", config.symbol, config.timeframe, bars.len());
    println!("As of:        {}", snapshot.timestamp);
    println!("Price:        {}", snapshot.price);
    println!("ATR({}):       {}", config.risk.atr_lookback, display_opt(snapshot.volatility));
    match emas {
        Some((fast, slow)) => {
            println!("EMA({}):      {:.4}", config.trend.fast_span, fast);
            println!("EMA({}):      {:.4}", config.trend.slow_span, slow);
        }
        None => println!("EMA:          undefined (need {} bars)", config.trend.slow_span),
    }
    println!("Trend:        {}", snapshot.trend);

    println!("\nTrailing references (window {}):", config.risk.atr_lookback);
    println!("  Highest high: {}", display_opt(snapshot.recent_high));
    println!("  Lowest low:   {}", display_opt(snapshot.recent_low));

    if let (Some(atr), Some(high), Some(low)) = (snapshot.volatility, snapshot.recent_high, snapshot.recent_low) {
        let risk = &config.risk;
        let long_stop = (snapshot.price - risk.stop_atr_mult * atr).max(high - risk.trail_atr_mult * atr);
        let short_stop = (snapshot.price + risk.stop_atr_mult * atr).min(low + risk.trail_atr_mult * atr);
        println!("  Long stop if entered now:  {}", long_stop.round_dp(4));
        println!("  Short stop if entered now: {}", short_stop.round_dp(4));
        println!("  Next long add step:        {}", (snapshot.price + risk.add_step_atr_mult * atr).round_dp(4));
    }

    Ok(())
}

fn print_config(config: &EngineConfig) {
    let risk = &config.risk;

    println!("\n=== Engine Configuration ===\n");
    println!("Market:");
    println!("  Symbol:               {}", config.symbol);
    println!("  Timeframe:            {}", config.timeframe);
    println!("  Bars per fetch:       {}", config.bar_limit);
    println!("  Poll interval:        {}s", config.poll_interval_secs);

    println!("\nSizing:");
    println!("  Mode:                 {}", risk.sizing_mode);
    println!("  Risk fraction:        {}%", risk.risk_fraction * Decimal::from(100));
    println!("  Quantity decimals:    {}", config.quantity_decimals);

    println!("\nVolatility & Stops:");
    println!("  ATR lookback:         {}", risk.atr_lookback);
    println!("  Stop:                 {} x ATR", risk.stop_atr_mult);
    println!("  Trail:                {} x ATR", risk.trail_atr_mult);
    println!("  Add step:             {} x ATR", risk.add_step_atr_mult);
    println!("  Max adds:             {}", risk.max_adds);

    println!("\nTrend:");
    println!("  EMA spans:            {}/{}", config.trend.fast_span, config.trend.slow_span);
    println!("  Short side:           {}", if config.allow_short { "enabled" } else { "disabled" });
    println!("  Exit sizing:          {:?}", config.exit_sizing);
    println!("  Bars required:        {}", config.required_bars());

    let webhook = WebhookConfig::default();
    println!("\n=== Webhook Defaults ===\n");
    println!("  Listen:               {}{}", webhook.bind_addr, webhook.route);
    println!("  Timeframe:            {} ({} bars)", webhook.timeframe, webhook.bar_limit);
    println!("  Sizing:               {} @ {}", webhook.sizing_mode, webhook.risk_fraction);
    println!("  Stop:                 {} x ATR({})", webhook.stop_atr_mult, webhook.atr_lookback);
}

fn display_opt(value: Option<Decimal>) -> String {
    value.map(|v| v.round_dp(4).to_string()).unwrap_or_else(|| "undefined".to_string())
}
