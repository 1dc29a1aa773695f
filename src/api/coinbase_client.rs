//! Coinbase Exchange REST client: candles, balances, market orders.
//!
//! Public candle requests need no credentials. Account and order endpoints
//! are signed with the API secret:
//! `CB-ACCESS-SIGN = base64(HMAC-SHA256(base64decode(secret), timestamp + METHOD + path + body))`

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::exchange::{ExecutionGateway, MarketData};
use crate::models::{normalize_bars, Bar, Fill, OrderSide, Timeframe};

use super::types::*;

const EXCHANGE_API_BASE: &str = "https://api.exchange.coinbase.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("flywheel/", env!("CARGO_PKG_VERSION"));

/// Most candles the API returns per request.
pub const MAX_CANDLES: usize = 300;

type HmacSha256 = Hmac<Sha256>;

/// API key triple for signed endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub key: String,
    /// Base64-encoded secret
    pub secret: String,
    pub passphrase: String,
}

impl Credentials {
    /// Read from environment variables:
    /// - COINBASE_KEY
    /// - COINBASE_SECRET
    /// - COINBASE_PASSPHRASE (may be empty)
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("COINBASE_KEY").context("COINBASE_KEY not set")?;
        let secret = std::env::var("COINBASE_SECRET").context("COINBASE_SECRET not set")?;
        let passphrase = std::env::var("COINBASE_PASSPHRASE").unwrap_or_default();

        Ok(Self {
            key,
            secret,
            passphrase,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Client for the Coinbase Exchange API.
pub struct CoinbaseClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl CoinbaseClient {
    /// Create a client; `None` credentials restrict it to public endpoints.
    pub fn new(credentials: Option<Credentials>) -> Result<Self> {
        Self::with_base_url(EXCHANGE_API_BASE.to_string(), credentials)
    }

    /// Create with custom base URL (for sandbox or testing).
    pub fn with_base_url(base_url: String, credentials: Option<Credentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Fetch the most recent `limit` candles, oldest first.
    pub async fn get_candles(&self, product_id: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>> {
        let limit = limit.clamp(1, MAX_CANDLES);
        let granularity = timeframe.seconds();
        let end = Utc::now();
        let start = end - chrono::Duration::seconds(granularity * limit as i64);

        let url = format!(
            "{}/products/{}/candles?granularity={}&start={}&end={}",
            self.base_url,
            product_id,
            granularity,
            start.to_rfc3339(),
            end.to_rfc3339()
        );

        debug!(url = %url, "Fetching candles");

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        };
        let url = url.as_str();
        let rows: Vec<CandleRow> =
            backoff::future::retry(policy, || async move { self.get_public(url).await }).await?;

        let mut bars = rows_to_bars(&rows);
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        Ok(bars)
    }

    /// All accounts of the API key's profile.
    pub async fn get_accounts(&self) -> Result<Vec<AccountResponse>> {
        let response = self.signed(Method::GET, "/accounts", None).await?;
        parse_response(response, "accounts").await
    }

    /// Submit a market order sized in base units.
    pub async fn create_market_order(
        &self,
        product_id: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<OrderResponse> {
        let request = MarketOrderRequest {
            order_type: "market",
            side: match side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            product_id: product_id.to_string(),
            size: size.normalize().to_string(),
            client_oid: uuid::Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_string(&request).context("Failed to encode order")?;

        debug!(product = %product_id, side = %side, size = %request.size, "Submitting market order");

        let response = self.signed(Method::POST, "/orders", Some(body)).await?;
        let order: OrderResponse = parse_response(response, "order").await?;

        if order.is_rejected() {
            anyhow::bail!(
                "Order {} rejected: {}",
                order.id,
                order.reject_reason.as_deref().unwrap_or("no reason given")
            );
        }
        Ok(order)
    }

    /// Current state of one order.
    pub async fn get_order(&self, order_id: &str) -> Result<OrderResponse> {
        let path = format!("/orders/{}", order_id);
        let response = self.signed(Method::GET, &path, None).await?;
        parse_response(response, "order status").await
    }

    /// Poll an order until it is done and settled.
    pub async fn wait_for_settlement(&self, order_id: &str) -> Result<OrderResponse> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        backoff::future::retry(policy, || async move {
            let order = self.get_order(order_id).await.map_err(backoff::Error::transient)?;

            if order.is_rejected() {
                return Err(backoff::Error::permanent(anyhow!(
                    "Order {} rejected: {}",
                    order.id,
                    order.reject_reason.as_deref().unwrap_or("no reason given")
                )));
            }
            if order.is_final() {
                Ok(order)
            } else {
                Err(backoff::Error::transient(anyhow!(
                    "Order {} not settled (status {})",
                    order.id,
                    order.status
                )))
            }
        })
        .await
        .with_context(|| format!("Order {} did not settle", order_id))
    }

    /// Unsigned GET, classifying failures for the retry policy.
    async fn get_public<T: DeserializeOwned>(&self, url: &str) -> Result<T, backoff::Error<anyhow::Error>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow!(e).context("Request failed")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow!(e).context("Failed to parse response")));
        }

        let body = response.text().await.unwrap_or_default();
        let err = anyhow!("Request failed: {} - {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(status = %status, "Transient API failure, retrying");
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }

    async fn signed(&self, method: Method, path: &str, body: Option<String>) -> Result<Response> {
        let creds = self.credentials.as_ref().context(
            "Coinbase credentials not configured (COINBASE_KEY, COINBASE_SECRET, COINBASE_PASSPHRASE)",
        )?;

        let timestamp = Utc::now().timestamp().to_string();
        let body = body.unwrap_or_default();
        let signature = sign_request(&creds.secret, &timestamp, method.as_str(), path, &body)?;

        let mut request = self
            .client
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .header("cb-access-key", &creds.key)
            .header("cb-access-sign", signature)
            .header("cb-access-timestamp", &timestamp)
            .header("cb-access-passphrase", &creds.passphrase);

        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, path))
    }
}

/// Signature for one signed request.
pub fn sign_request(secret_b64: &str, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
    let key = STANDARD
        .decode(secret_b64)
        .context("COINBASE_SECRET is not valid base64")?;

    let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Convert newest-first candle rows into ascending, de-duplicated bars.
pub fn rows_to_bars(rows: &[CandleRow]) -> Vec<Bar> {
    let bars = rows
        .iter()
        .filter_map(|&[time, low, high, open, close, volume]| {
            let timestamp = Utc.timestamp_opt(time as i64, 0).single()?;
            Some(Bar::new(timestamp, open, high, low, close, volume))
        })
        .collect();

    normalize_bars(bars)
}

async fn parse_response<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        anyhow::bail!("{} request failed: {} - {}", what, status, message);
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

#[async_trait]
impl MarketData for CoinbaseClient {
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Bar>> {
        self.get_candles(symbol, timeframe, limit).await
    }
}

#[async_trait]
impl ExecutionGateway for CoinbaseClient {
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Fill> {
        let order = self.create_market_order(symbol, side, quantity).await?;
        let settled = self.wait_for_settlement(&order.id).await?;

        let fill = Fill {
            order_id: settled.id.clone(),
            side,
            filled_quantity: settled.filled(),
            average_price: settled.average_price(),
        };

        info!(
            order_id = %fill.order_id,
            side = %side,
            filled = %fill.filled_quantity,
            price = %fill.average_price,
            done_reason = ?settled.done_reason,
            "Order settled"
        );

        Ok(fill)
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal> {
        let accounts = self.get_accounts().await?;
        Ok(accounts
            .iter()
            .find(|a| a.currency.eq_ignore_ascii_case(asset))
            .map(|a| a.balance)
            .unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rows_to_bars_reorders_ascending() {
        let rows: Vec<CandleRow> = vec![
            [1_700_000_120.0, 9.0, 12.0, 10.0, 11.0, 5.0],
            [1_700_000_060.0, 8.0, 11.0, 9.0, 10.0, 4.0],
            [1_700_000_060.0, 8.0, 11.0, 9.0, 10.5, 4.0],
        ];
        let bars = rows_to_bars(&rows);

        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[1].open, 10.0);
        assert_eq!(bars[1].high, 12.0);
        assert_eq!(bars[1].low, 9.0);
        assert_eq!(bars[1].close, 11.0);
    }

    #[test]
    fn test_sign_request_is_stable() {
        let secret = STANDARD.encode(b"super-secret-key");
        let a = sign_request(&secret, "1700000000", "POST", "/orders", "{}").unwrap();
        let b = sign_request(&secret, "1700000000", "POST", "/orders", "{}").unwrap();
        let c = sign_request(&secret, "1700000001", "POST", "/orders", "{}").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_sign_request_rejects_bad_secret() {
        assert!(sign_request("not base64!!", "1", "GET", "/accounts", "").is_err());
    }

    #[test]
    fn test_order_response_average_price() {
        let order: OrderResponse = serde_json::from_str(
            r#"{"id":"abc","status":"done","settled":true,"filled_size":"0.5","executed_value":"1500.25","done_reason":"filled"}"#,
        )
        .unwrap();

        assert!(order.is_final());
        assert_eq!(order.filled(), dec!(0.5));
        assert_eq!(order.average_price(), dec!(3000.5));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            key: "k".to_string(),
            secret: "s3cr3t".to_string(),
            passphrase: "p4ss".to_string(),
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("s3cr3t"));
        assert!(!shown.contains("p4ss"));
    }
}
