//! Core order and tick types
//!
//! Defines the conditional order record, its lifecycle state machine, and
//! the tick payload flowing from the market-data feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order ID type - caller-assigned, unique across the engine
pub type OrderId = u64;

/// Instrument token - the broker's stable numeric instrument identifier
pub type InstrumentToken = u32;

/// Transaction side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Buy,
    Sell,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Buy => "BUY",
            Operation::Sell => "SELL",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Operation::Buy),
            "SELL" => Ok(Operation::Sell),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Order type - determines the trigger condition evaluated on each tick
///
/// Buy limit executes at or below the limit price, sell limit at or above.
/// Stop-loss orders trigger on the opposite side: buy at or above the
/// trigger price, sell at or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "SL")]
    Sl,
    #[serde(rename = "SL-M")]
    SlM,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Sl => "SL",
            OrderType::SlM => "SL-M",
        }
    }

    /// Limit price is mandatory for LIMIT and SL orders
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Sl)
    }

    /// Trigger price is mandatory for SL and SL-M orders
    pub fn requires_trigger_price(&self) -> bool {
        matches!(self, OrderType::Sl | OrderType::SlM)
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "SL" => Ok(OrderType::Sl),
            "SL-M" => Ok(OrderType::SlM),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Order lifecycle state machine
///
/// `Pending -> PartiallyExecuted -> Completed`, with `Pending -> Cancelled`
/// and any state reachable to `Rejected`/`Completed` on terminal broker
/// outcomes. Terminal states are immutable and the order leaves the live
/// cache once one is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PARTIALLY_EXECUTED")]
    PartiallyExecuted,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyExecuted => "PARTIALLY_EXECUTED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PARTIALLY_EXECUTED" => Ok(OrderStatus::PartiallyExecuted),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller payload for admitting a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub trading_symbol: String,
    pub quantity: u32,
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub trigger_price: Option<f64>,
    pub variety: String,
    pub product: String,
    pub validity: String,
    pub operation: Operation,
    pub execution_limit: u32,
}

/// Mutable order fields accepted by `modify_order`
///
/// Modification replaces the full mutable field set rather than patching
/// individual fields, matching the durable update it guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderChanges {
    pub trading_symbol: String,
    pub quantity: u32,
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub trigger_price: Option<f64>,
    pub variety: String,
    pub product: String,
    pub validity: String,
    pub operation: Operation,
}

/// A live conditional order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub trading_symbol: String,
    pub instrument_token: InstrumentToken,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub variety: String,
    pub product: String,
    pub validity: String,
    pub operation: Operation,
    pub execution_limit: u32,
    pub executions_done: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh order from an admission request and its resolved token
    pub fn new(request: OrderRequest, instrument_token: InstrumentToken) -> Self {
        Self {
            order_id: request.order_id,
            trading_symbol: request.trading_symbol,
            instrument_token,
            quantity: request.quantity,
            order_type: request.order_type,
            limit_price: request.limit_price,
            trigger_price: request.trigger_price,
            variety: request.variety,
            product: request.product,
            validity: request.validity,
            operation: request.operation,
            execution_limit: request.execution_limit,
            executions_done: 0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Replace the mutable field set, keeping identity and counters
    pub fn apply_changes(&mut self, changes: &OrderChanges, instrument_token: InstrumentToken) {
        self.trading_symbol = changes.trading_symbol.clone();
        self.quantity = changes.quantity;
        self.order_type = changes.order_type;
        self.limit_price = changes.limit_price;
        self.trigger_price = changes.trigger_price;
        self.variety = changes.variety.clone();
        self.product = changes.product.clone();
        self.validity = changes.validity.clone();
        self.operation = changes.operation;
        self.instrument_token = instrument_token;
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// One price update for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_token: InstrumentToken,
    pub last_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(instrument_token: InstrumentToken, last_price: f64) -> Self {
        Self {
            instrument_token,
            last_price,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OrderRequest {
        OrderRequest {
            order_id: 1,
            trading_symbol: "EDELWEISS".to_string(),
            quantity: 10,
            order_type: OrderType::Market,
            limit_price: None,
            trigger_price: None,
            variety: "regular".to_string(),
            product: "CNC".to_string(),
            validity: "DAY".to_string(),
            operation: Operation::Buy,
            execution_limit: 1,
        }
    }

    #[test]
    fn test_new_order_starts_pending() {
        let order = Order::new(request(), 98049);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.executions_done, 0);
        assert_eq!(order.instrument_token, 98049);
        assert!(order.is_live());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyExecuted.is_terminal());
    }

    #[test]
    fn test_wire_strings_round_trip() {
        for ty in [OrderType::Market, OrderType::Limit, OrderType::Sl, OrderType::SlM] {
            assert_eq!(ty.as_str().parse::<OrderType>().unwrap(), ty);
        }
        for st in [
            OrderStatus::Pending,
            OrderStatus::PartiallyExecuted,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert_eq!(st.as_str().parse::<OrderStatus>().unwrap(), st);
        }
        assert_eq!(OrderType::SlM.as_str(), "SL-M");
    }

    #[test]
    fn test_price_requirements_by_type() {
        assert!(OrderType::Limit.requires_limit_price());
        assert!(OrderType::Sl.requires_limit_price());
        assert!(!OrderType::SlM.requires_limit_price());
        assert!(OrderType::Sl.requires_trigger_price());
        assert!(OrderType::SlM.requires_trigger_price());
        assert!(!OrderType::Market.requires_trigger_price());
    }

    #[test]
    fn test_apply_changes_keeps_counters() {
        let mut order = Order::new(request(), 98049);
        order.executions_done = 1;

        let changes = OrderChanges {
            trading_symbol: "INFY".to_string(),
            quantity: 50,
            order_type: OrderType::Limit,
            limit_price: Some(1600.0),
            trigger_price: None,
            variety: "regular".to_string(),
            product: "MIS".to_string(),
            validity: "DAY".to_string(),
            operation: Operation::Sell,
        };
        order.apply_changes(&changes, 408065);

        assert_eq!(order.trading_symbol, "INFY");
        assert_eq!(order.instrument_token, 408065);
        assert_eq!(order.executions_done, 1);
        assert_eq!(order.order_id, 1);
    }
}
