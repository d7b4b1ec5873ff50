//! Conditional Order Management & Execution Engine
//!
//! A single-node engine for NSE equities via the Zerodha Kite Connect API:
//! it ingests live price ticks for subscribed instruments, holds a working
//! set of pending conditional orders (MARKET, LIMIT, SL, SL-M), evaluates
//! each order's trigger condition against incoming ticks, and dispatches
//! matched orders to the broker while durably recording lifecycle state in
//! SQLite.
//!
//! The moving parts: TTL/LRU caches over instrument tokens, ticks, and live
//! orders; a feed adapter translating market-data events into a tick queue;
//! a pool of tick workers evaluating triggers under per-order locks; a
//! persistence pool draining durable-write jobs; a cache janitor; and a
//! supervisor owning the whole lifecycle.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use order_engine::kite::{PaperBroker, SimFeed};
//! use order_engine::{Config, Operation, OrderEngine, OrderRequest, OrderType};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let feed = SimFeed::random_walk(100.0, Duration::from_millis(500));
//!     let broker = Arc::new(PaperBroker::new());
//!
//!     let mut engine = OrderEngine::new(&config, Arc::new(feed), broker)?;
//!     engine.start()?;
//!
//!     engine.add_order(OrderRequest {
//!         order_id: 1,
//!         trading_symbol: "EDELWEISS".to_string(),
//!         quantity: 1,
//!         order_type: OrderType::Market,
//!         limit_price: None,
//!         trigger_price: None,
//!         variety: "regular".to_string(),
//!         product: "CNC".to_string(),
//!         validity: "DAY".to_string(),
//!         operation: Operation::Buy,
//!         execution_limit: 1,
//!     })?;
//!
//!     std::thread::sleep(Duration::from_secs(5));
//!     engine.stop();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod common;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod kite;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use engine::{CacheStats, DbJob, OrderEngine};
pub use error::{EngineError, EngineResult};
pub use types::*;
