//! Trading logic: configuration, risk sizing, decision engine.

mod config;
mod engine;
mod risk_sizer;

pub use config::{EngineConfig, ExitSizing, RiskConfig, TrendConfig, WebhookConfig};
pub use engine::{Decision, IdleReason, MarketSnapshot, PositionEngine};
pub use risk_sizer::{RiskSizer, SizingMode};
