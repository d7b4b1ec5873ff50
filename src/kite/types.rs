//! Kite API data structures

use crate::types::{InstrumentToken, Operation, Order, OrderId, OrderStatus, OrderType};
use serde::{Deserialize, Serialize};

/// Response envelope wrapping every Kite JSON payload
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub data: T,
}

/// Last-traded-price quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtpQuote {
    pub instrument_token: InstrumentToken,
    pub last_price: f64,
}

/// Order placement acknowledgement
#[derive(Debug, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

/// Order-status push notification from the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub status: String,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub exchange_timestamp: Option<String>,
}

impl OrderUpdate {
    /// Maps a broker-reported terminal status onto the engine's state machine.
    /// Non-terminal updates (OPEN, TRIGGER PENDING, ...) return `None`.
    pub fn terminal_status(&self) -> Option<OrderStatus> {
        match self.status.as_str() {
            "COMPLETE" => Some(OrderStatus::Completed),
            "REJECTED" => Some(OrderStatus::Rejected),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Parameters for the order placement endpoint
#[derive(Debug, Clone)]
pub struct PlaceOrderParams {
    pub variety: String,
    pub exchange: String,
    pub trading_symbol: String,
    pub transaction_type: Operation,
    pub quantity: u32,
    pub product: String,
    pub order_type: OrderType,
    pub validity: String,
}

impl PlaceOrderParams {
    pub fn from_order(order: &Order, exchange: &str) -> Self {
        Self {
            variety: order.variety.clone(),
            exchange: exchange.to_string(),
            trading_symbol: order.trading_symbol.clone(),
            transaction_type: order.operation,
            quantity: order.quantity,
            product: order.product.clone(),
            order_type: order.order_type,
            validity: order.validity.clone(),
        }
    }
}

/// One row of the exchange's instrument dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub instrument_token: InstrumentToken,
    pub exchange_token: u32,
    pub tradingsymbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub strike: f64,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub lot_size: u32,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub exchange: String,
}
