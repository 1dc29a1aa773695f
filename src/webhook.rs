//! Webhook driver: one POSTed side becomes one sized market order.
//!
//! This path shares the sizer and ATR with the poll engine but keeps no
//! position state. Requests are serialized behind a lock so two signals
//! never size against the same balance read.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{ConfigError, CycleError, SizingError};
use crate::exchange::{ExecutionGateway, MarketData};
use crate::indicators;
use crate::models::{Fill, OrderSide};
use crate::trading::{RiskSizer, WebhookConfig};

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    #[serde(default)]
    pub side: String,
}

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<OrderSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Fill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SignalResponse {
    fn error(side: Option<OrderSide>, message: String) -> Self {
        Self {
            status: "error",
            side,
            size: None,
            order: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("{0}")]
    InvalidSide(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("sizing failed: {0}")]
    Sizing(#[from] SizingError),
}

impl SignalError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SignalError::InvalidSide(_) => StatusCode::BAD_REQUEST,
            SignalError::Sizing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SignalError::Cycle(CycleError::OrderExecutionFailed(_)) => StatusCode::BAD_GATEWAY,
            SignalError::Cycle(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Sizes and routes webhook signals.
pub struct WebhookDesk<M, G> {
    config: WebhookConfig,
    sizer: RiskSizer,
    market: Arc<M>,
    gateway: Arc<G>,
    lock: Mutex<()>,
}

impl<M: MarketData, G: ExecutionGateway> WebhookDesk<M, G> {
    pub fn new(config: WebhookConfig, market: Arc<M>, gateway: Arc<G>) -> Result<Self, ConfigError> {
        config.validate()?;
        let sizer = RiskSizer::new(
            config.sizing_mode,
            config.risk_fraction,
            config.stop_atr_mult,
            config.quantity_decimals,
        );

        Ok(Self {
            config,
            sizer,
            market,
            gateway,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Validate the side, size against fresh bars and balance, place the order.
    pub async fn execute_signal(&self, raw_side: &str) -> Result<(OrderSide, Decimal, Fill), SignalError> {
        let side: OrderSide = raw_side.parse().map_err(SignalError::InvalidSide)?;

        let _guard = self.lock.lock().await;
        let config = &self.config;

        let (bars, balance) = futures::future::try_join(
            async {
                self.market
                    .fetch_bars(&config.symbol, config.timeframe, config.bar_limit)
                    .await
                    .map_err(|e| CycleError::DataUnavailable(format!("{:#}", e)))
            },
            async {
                self.gateway
                    .get_balance(config.quote_asset())
                    .await
                    .map_err(|e| CycleError::BalanceUnavailable(format!("{:#}", e)))
            },
        )
        .await?;

        let price = bars
            .last()
            .and_then(|b| Decimal::try_from(b.close).ok())
            .ok_or_else(|| CycleError::DataUnavailable("no usable close".to_string()))?;
        let volatility = indicators::atr(&bars, config.atr_lookback).and_then(|v| Decimal::try_from(v).ok());

        let size = self.sizer.size_order(balance, volatility, price)?;

        info!(
            side = %side,
            size = %size,
            price = %price,
            atr = ?volatility,
            balance = %balance,
            "Webhook signal sized"
        );

        let fill = self
            .gateway
            .place_market_order(&config.symbol, side, size)
            .await
            .map_err(|e| CycleError::OrderExecutionFailed(format!("{:#}", e)))?;
        if !fill.is_filled() {
            return Err(CycleError::OrderExecutionFailed(format!("order {} did not fill", fill.order_id)).into());
        }

        Ok((side, size, fill))
    }
}

/// Routes: `POST {route}` for signals and `GET /health`.
pub fn router<M, G>(desk: Arc<WebhookDesk<M, G>>) -> Router
where
    M: MarketData + 'static,
    G: ExecutionGateway + 'static,
{
    let route = desk.config().route.clone();

    Router::new()
        .route(&route, post(handle_signal::<M, G>))
        .route("/health", get(health_check))
        .with_state(desk)
}

/// Bind and serve until Ctrl+C.
pub async fn serve<M, G>(desk: Arc<WebhookDesk<M, G>>) -> Result<()>
where
    M: MarketData + 'static,
    G: ExecutionGateway + 'static,
{
    let addr = desk.config().bind_addr.clone();
    let route = desk.config().route.clone();
    let app = router(desk);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Webhook listening on http://{}{}", addr, route);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn handle_signal<M, G>(
    State(desk): State<Arc<WebhookDesk<M, G>>>,
    payload: Result<Json<SignalRequest>, JsonRejection>,
) -> (StatusCode, Json<SignalResponse>)
where
    M: MarketData + 'static,
    G: ExecutionGateway + 'static,
{
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(SignalResponse::error(None, rejection.body_text())),
            );
        }
    };

    match desk.execute_signal(&request.side).await {
        Ok((side, size, fill)) => {
            info!(order_id = %fill.order_id, side = %side, size = %size, "Webhook order filled");
            (
                StatusCode::OK,
                Json(SignalResponse {
                    status: "ok",
                    side: Some(side),
                    size: Some(size),
                    order: Some(fill),
                    message: None,
                }),
            )
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                error!(side = %request.side, error = %e, "Webhook signal failed");
            } else {
                warn!(side = %request.side, error = %e, "Webhook signal rejected");
            }
            let side = request.side.parse().ok();
            (status, Json(SignalResponse::error(side, e.to_string())))
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testing::{RecordingGateway, ScriptedMarket};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    fn desk(gateway: RecordingGateway) -> (Arc<WebhookDesk<ScriptedMarket, RecordingGateway>>, Arc<RecordingGateway>) {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let market = Arc::new(ScriptedMarket::from_closes(&closes));
        let gateway = Arc::new(gateway);
        let desk = WebhookDesk::new(WebhookConfig::default(), market, gateway.clone()).unwrap();
        (Arc::new(desk), gateway)
    }

    async fn post_signal(app: Router, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tv")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_hold_is_rejected_without_order() {
        let (desk, gateway) = desk(RecordingGateway::new(dec!(139)).with_balance("USDC", dec!(1000)));

        let (status, body) = post_signal(router(desk), r#"{"side":"HOLD"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("Invalid side"));
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_buy_is_sized_by_fixed_risk() {
        let (desk, gateway) = desk(RecordingGateway::new(dec!(139)).with_balance("USDC", dec!(1000)));

        let (status, body) = post_signal(router(desk), r#"{"side":"buy"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["side"], "BUY");
        // 1000 * 0.02 / (2.8 * 2), truncated to 8 places
        assert_eq!(gateway.orders.lock().unwrap()[0], (OrderSide::Buy, dec!(3.57142857)));
    }

    #[tokio::test]
    async fn test_missing_side_is_bad_request() {
        let (desk, gateway) = desk(RecordingGateway::new(dec!(139)).with_balance("USDC", dec!(1000)));

        let (status, body) = post_signal(router(desk), "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_exchange_failure_is_bad_gateway() {
        let (desk, gateway) = desk(RecordingGateway::new(dec!(139)).with_balance("USDC", dec!(1000)));
        gateway.set_failing_orders(true);

        let (status, body) = post_signal(router(desk), r#"{"side":"SELL"}"#).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], "error");
        assert_eq!(body["side"], "SELL");
    }

    #[tokio::test]
    async fn test_empty_balance_is_unprocessable() {
        let (desk, gateway) = desk(RecordingGateway::new(dec!(139)));

        let err = desk.execute_signal("BUY").await.unwrap_err();

        assert!(matches!(err, SignalError::Sizing(SizingError::NonPositiveBalance(_))));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_signals_size_against_post_fill_balance() {
        use crate::exchange::PaperGateway;
        use crate::models::Timeframe;

        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let market = Arc::new(ScriptedMarket::from_closes(&closes));
        let paper = Arc::new(PaperGateway::new(market.clone(), Timeframe::FifteenMinutes, "USDC", dec!(1000)));
        let desk = WebhookDesk::new(WebhookConfig::default(), market, paper.clone()).unwrap();

        let (a, b) = tokio::join!(desk.execute_signal("BUY"), desk.execute_signal("buy"));
        let mut sizes = vec![a.unwrap().1, b.unwrap().1];
        sizes.sort();

        // first: 1000 * 0.02 / 5.6; second sees 1000 - 3.57142857 * 139 = 503.57142877
        assert_eq!(sizes, vec![dec!(1.79846938), dec!(3.57142857)]);
        assert_eq!(paper.get_balance("ETH").await.unwrap(), dec!(5.36989795));
    }

    #[tokio::test]
    async fn test_health() {
        let (desk, _) = desk(RecordingGateway::new(dec!(139)));

        let response = router(desk)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
