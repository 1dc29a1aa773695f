//! Coinbase Exchange API client for candles, balances, and order execution.

mod coinbase_client;
mod types;

pub use coinbase_client::{CoinbaseClient, Credentials};
