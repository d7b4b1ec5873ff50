//! Order engine
//!
//! Wires the caches, queues, worker pools, and feed adapter into one
//! supervised lifecycle. `OrderEngine` owns the worker threads; every other
//! piece of state lives in `EngineShared` behind an `Arc` so workers and the
//! caller-facing operations see the same containers.
//!
//! Cross-worker communication goes exclusively through the bounded-poll
//! channels and the shared containers; no worker reaches into another
//! worker's local state.

mod feed;
mod intake;
mod janitor;
mod persist;
mod tick;

pub use persist::DbJob;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::{DashMap, DashSet};
use tracing::{error, info, warn};

use crate::cache::{LruCache, TtlCache};
use crate::config::Config;
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::kite::feed::{FeedMode, MarketFeed};
use crate::kite::BrokerClient;
use crate::types::{InstrumentToken, Order, OrderChanges, OrderId, OrderRequest, OrderStatus, Tick};

use intake::Admission;

/// Connection-ready signal: set by the feed adapter on connect, cleared on
/// close, awaited by `start()` with a bounded timeout.
pub(crate) struct ReadyFlag {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl ReadyFlag {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        *self.state.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    pub(crate) fn clear(&self) {
        *self.state.lock().unwrap() = false;
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Wait until the flag is set or the timeout elapses
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap();
        *guard
    }
}

/// Aggregate cache sizes for status queries and janitor logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub instruments: usize,
    pub ticks: usize,
    pub orders: usize,
}

/// State shared by every worker and the caller-facing operations
pub(crate) struct EngineShared {
    pub(crate) exchange: String,
    pub(crate) poll_timeout: Duration,
    pub(crate) janitor_interval: Duration,

    pub(crate) order_cache: Mutex<LruCache<OrderId, Order>>,
    pub(crate) instrument_cache: Mutex<TtlCache<String, InstrumentToken>>,
    pub(crate) tick_cache: Mutex<TtlCache<InstrumentToken, Tick>>,

    /// Instrument token -> order IDs interested in its ticks
    pub(crate) index: DashMap<InstrumentToken, Vec<OrderId>>,
    /// Latest price per instrument, for external read access
    pub(crate) last_prices: DashMap<InstrumentToken, f64>,
    /// Per-order mutual exclusion; serializes evaluate/execute/write-back
    pub(crate) order_locks: DashMap<OrderId, Arc<Mutex<()>>>,
    /// Tokens tracked on the feed; replayed on every (re)connect
    pub(crate) subscribed: DashSet<InstrumentToken>,

    pub(crate) running: AtomicBool,
    pub(crate) ready: ReadyFlag,

    pub(crate) db: Database,
    pub(crate) broker: Arc<dyn BrokerClient>,
    pub(crate) feed: Arc<dyn MarketFeed>,

    pub(crate) tick_tx: Sender<Tick>,
    pub(crate) tick_rx: Receiver<Tick>,
    pub(crate) db_tx: Sender<DbJob>,
    pub(crate) db_rx: Receiver<DbJob>,
    pub(crate) intake_tx: Sender<Admission>,
    pub(crate) intake_rx: Receiver<Admission>,
}

impl EngineShared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The mutex serializing work on one order
    pub(crate) fn lock_for(&self, order_id: OrderId) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn cached_order(&self, order_id: OrderId) -> Option<Order> {
        self.order_cache.lock().unwrap().get(&order_id).cloned()
    }

    /// Seal a terminal state: queue the durable write and drop the order from
    /// the live cache, the instrument index, and the lock table.
    pub(crate) fn complete_order(&self, order_id: OrderId, status: OrderStatus) {
        info!(order_id, status = %status, "completing order");
        let _ = self.db_tx.send(DbJob::Complete { order_id, status });

        let removed = self.order_cache.lock().unwrap().remove(&order_id);
        if let Some(order) = removed {
            self.remove_from_index(order.instrument_token, order_id);
        }
        self.order_locks.remove(&order_id);
    }

    pub(crate) fn remove_from_index(&self, token: InstrumentToken, order_id: OrderId) {
        if let Some(mut ids) = self.index.get_mut(&token) {
            ids.retain(|id| *id != order_id);
        }
    }

    /// Track `token` and subscribe it on the feed if it is new
    pub(crate) fn ensure_subscribed(&self, token: InstrumentToken) -> EngineResult<()> {
        if self.subscribed.insert(token) {
            self.feed.subscribe(&[token])?;
            self.feed.set_mode(FeedMode::Full, &[token])?;
        }
        Ok(())
    }

    pub(crate) fn cache_stats(&self) -> CacheStats {
        CacheStats {
            instruments: self.instrument_cache.lock().unwrap().len(),
            ticks: self.tick_cache.lock().unwrap().len(),
            orders: self.order_cache.lock().unwrap().len(),
        }
    }
}

/// The supervised engine
pub struct OrderEngine {
    shared: Arc<EngineShared>,
    tick_workers: usize,
    db_workers: usize,
    connect_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl OrderEngine {
    /// Build the engine and warm-start its caches from the durable store.
    ///
    /// The schema is created if missing; live orders and the instrument
    /// mapping are loaded into their caches so a restart resumes where the
    /// previous process stopped.
    pub fn new(
        config: &Config,
        feed: Arc<dyn MarketFeed>,
        broker: Arc<dyn BrokerClient>,
    ) -> EngineResult<Self> {
        let db = Database::new(&config.database.path);
        db.init_schema()?;

        let engine_cfg = &config.engine;
        let (tick_tx, tick_rx) = unbounded();
        let (db_tx, db_rx) = unbounded();
        let (intake_tx, intake_rx) = unbounded();

        let shared = Arc::new(EngineShared {
            exchange: config.broker.exchange.clone(),
            poll_timeout: Duration::from_millis(engine_cfg.queue_poll_ms),
            janitor_interval: Duration::from_secs(engine_cfg.janitor_interval_secs),
            order_cache: Mutex::new(LruCache::new(engine_cfg.order_cache_size)),
            instrument_cache: Mutex::new(TtlCache::new(
                engine_cfg.instrument_cache_size,
                Duration::from_secs(engine_cfg.instrument_ttl_secs),
            )),
            tick_cache: Mutex::new(TtlCache::new(
                engine_cfg.tick_cache_size,
                Duration::from_secs(engine_cfg.tick_ttl_secs),
            )),
            index: DashMap::new(),
            last_prices: DashMap::new(),
            order_locks: DashMap::new(),
            subscribed: DashSet::new(),
            running: AtomicBool::new(false),
            ready: ReadyFlag::new(),
            db,
            broker,
            feed,
            tick_tx,
            tick_rx,
            db_tx,
            db_rx,
            intake_tx,
            intake_rx,
        });

        let engine = Self {
            shared,
            tick_workers: engine_cfg.effective_tick_workers(),
            db_workers: engine_cfg.db_workers.max(1),
            connect_timeout: Duration::from_secs(engine_cfg.connect_timeout_secs),
            workers: Vec::new(),
        };
        engine.warm_start()?;
        Ok(engine)
    }

    fn warm_start(&self) -> EngineResult<()> {
        let orders = self.shared.db.load_active_orders()?;
        let tokens = self.shared.db.load_symbol_tokens()?;

        {
            let mut instrument_cache = self.shared.instrument_cache.lock().unwrap();
            for (symbol, token) in tokens {
                instrument_cache.put(symbol, token);
            }
        }

        let mut order_cache = self.shared.order_cache.lock().unwrap();
        for order in orders {
            self.shared
                .index
                .entry(order.instrument_token)
                .or_default()
                .push(order.order_id);
            self.shared.subscribed.insert(order.instrument_token);
            order_cache.put(order.order_id, order);
        }

        if !order_cache.is_empty() {
            info!(orders = order_cache.len(), "warm-started live orders from database");
        }
        Ok(())
    }

    /// Connect the feed, wait for readiness, and launch every worker.
    ///
    /// Fails fast with `EngineError::Connection` if the feed handshake does
    /// not complete within the configured timeout; no worker outlives the
    /// failure.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("start() called on a running engine");
            return Ok(());
        }
        info!(
            tick_workers = self.tick_workers,
            db_workers = self.db_workers,
            "starting order engine"
        );

        let (events_tx, events_rx) = unbounded();
        if let Err(e) = self.shared.feed.connect(events_tx) {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(EngineError::Connection(e.to_string()));
        }

        self.spawn("feed-adapter", {
            let shared = Arc::clone(&self.shared);
            move || feed::feed_adapter(shared, events_rx)
        });

        if !self.shared.ready.wait_timeout(self.connect_timeout) {
            error!(
                timeout_secs = self.connect_timeout.as_secs(),
                "feed connection was not ready in time"
            );
            self.stop();
            return Err(EngineError::Connection(format!(
                "feed not ready within {}s",
                self.connect_timeout.as_secs()
            )));
        }

        self.spawn("order-indexer", {
            let shared = Arc::clone(&self.shared);
            move || intake::indexing_worker(shared)
        });
        self.spawn("cache-janitor", {
            let shared = Arc::clone(&self.shared);
            move || janitor::janitor(shared)
        });
        for i in 0..self.db_workers {
            self.spawn(&format!("db-worker-{i}"), {
                let shared = Arc::clone(&self.shared);
                move || persist::db_worker(shared)
            });
        }
        for i in 0..self.tick_workers {
            self.spawn(&format!("tick-worker-{i}"), {
                let shared = Arc::clone(&self.shared);
                move || tick::tick_worker(shared)
            });
        }

        info!("order engine started");
        Ok(())
    }

    /// Stop the engine: clear the running flag, close the feed, and join
    /// every worker. Idempotent, and cannot deadlock because every worker
    /// loop bounds its blocking at the queue poll interval. Workers are
    /// joined even when the engine already cleared its own flag (reconnect
    /// exhaustion shuts the pipeline down from inside the feed adapter).
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!("stopping order engine");
        }
        self.shared.feed.close();
        self.shared.ready.clear();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "worker panicked during shutdown");
            }
        }
        if was_running {
            info!("order engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Whether the market-data connection is currently ready
    pub fn feed_ready(&self) -> bool {
        self.shared.ready.is_set()
    }

    // -- caller-facing operations -------------------------------------------

    /// Admit a new conditional order. See the intake pipeline for the exact
    /// sequencing; failure leaves no partial state behind.
    pub fn add_order(&self, request: OrderRequest) -> EngineResult<()> {
        intake::add_order(&self.shared, request)
    }

    /// Modify a still-PENDING order. Returns `false` (a logged no-op) when
    /// the order has already progressed.
    pub fn modify_order(&self, order_id: OrderId, changes: OrderChanges) -> EngineResult<bool> {
        intake::modify_order(&self.shared, order_id, changes)
    }

    /// Cancel a still-PENDING order. Returns `false` (a logged no-op) when
    /// the order has already progressed.
    pub fn cancel_order(&self, order_id: OrderId) -> EngineResult<bool> {
        intake::cancel_order(&self.shared, order_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache_stats()
    }

    /// Latest price published for an instrument, if any tick has arrived
    pub fn last_price(&self, token: InstrumentToken) -> Option<f64> {
        self.shared.last_prices.get(&token).map(|price| *price)
    }

    /// Snapshot of an order: the live cache first, the durable row otherwise
    pub fn order(&self, order_id: OrderId) -> EngineResult<Option<Order>> {
        if let Some(order) = self.shared.cached_order(order_id) {
            return Ok(Some(order));
        }
        self.shared.db.order_row(order_id)
    }

    /// Order IDs currently indexed against an instrument's ticks
    pub fn orders_for_instrument(&self, token: InstrumentToken) -> Vec<OrderId> {
        self.shared
            .index
            .get(&token)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    fn spawn(&mut self, name: &str, body: impl FnOnce() + Send + 'static) {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .expect("failed to spawn worker thread");
        self.workers.push(handle);
    }
}

impl Drop for OrderEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
