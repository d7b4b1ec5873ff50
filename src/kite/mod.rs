//! Zerodha Kite API integration
//!
//! REST client for order placement and quote lookups, plus the market-data
//! feed contract the engine subscribes through.

pub mod client;
pub mod error;
pub mod feed;
pub mod paper;
pub mod types;

pub use client::{ClientConfig, Credentials, KiteClient};
pub use error::{KiteError, KiteResult};
pub use feed::{FeedEvent, FeedMode, MarketFeed, PollingFeed, SimFeed};
pub use paper::PaperBroker;
pub use types::*;

use std::collections::HashMap;

pub const API_BASE_URL: &str = "https://api.kite.trade";

/// Broker REST contract consumed by the engine: order placement for trigger
/// execution and last-traded-price lookups for instrument token resolution.
pub trait BrokerClient: Send + Sync {
    /// Place an order, returning the broker's order reference.
    fn place_order(&self, params: &PlaceOrderParams) -> KiteResult<String>;

    /// Last traded price for `EXCHANGE:SYMBOL` keys.
    fn ltp(&self, keys: &[String]) -> KiteResult<HashMap<String, LtpQuote>>;
}
