//! Market-data feed contract
//!
//! The engine consumes the feed as a stream of typed events on a channel
//! rather than a bundle of callbacks. Two implementations ship with the
//! crate: `PollingFeed` drives the Kite LTP endpoint on a fixed cadence and
//! synthesizes reconnect semantics from consecutive failures, `SimFeed`
//! generates scripted or random-walk ticks for paper trading and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::Rng;
use tracing::{debug, warn};

use super::error::{KiteError, KiteResult};
use super::types::OrderUpdate;
use super::BrokerClient;
use crate::db::Database;
use crate::types::{InstrumentToken, Tick};

/// Subscription depth on the market-data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Ltp,
    Quote,
    Full,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Ltp => "ltp",
            FeedMode::Quote => "quote",
            FeedMode::Full => "full",
        }
    }
}

/// Typed events published by a feed implementation
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Closed { code: u16, reason: String },
    Error { code: u16, reason: String },
    Reconnecting { attempt: u32 },
    ReconnectExhausted,
    Ticks(Vec<Tick>),
    OrderUpdate(OrderUpdate),
}

/// Push-based market-data subscription contract
pub trait MarketFeed: Send + Sync {
    /// Begin the connection handshake without blocking; events arrive on
    /// `events` once established.
    fn connect(&self, events: Sender<FeedEvent>) -> KiteResult<()>;

    /// Subscribe additional instrument tokens.
    fn subscribe(&self, tokens: &[InstrumentToken]) -> KiteResult<()>;

    /// Select the subscription depth for the given tokens.
    fn set_mode(&self, mode: FeedMode, tokens: &[InstrumentToken]) -> KiteResult<()>;

    /// Tear the connection down. Idempotent.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// PollingFeed
// ---------------------------------------------------------------------------

struct PollingInner {
    client: Arc<dyn BrokerClient>,
    db: Database,
    exchange: String,
    poll_interval: Duration,
    max_failures: u32,
    stop: AtomicBool,
    subscriptions: Mutex<HashMap<InstrumentToken, String>>,
}

/// LTP-polling market-data feed over the broker REST API
pub struct PollingFeed {
    inner: Arc<PollingInner>,
}

impl PollingFeed {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        db: Database,
        exchange: impl Into<String>,
        poll_interval: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                client,
                db,
                exchange: exchange.into(),
                poll_interval,
                max_failures,
                stop: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl MarketFeed for PollingFeed {
    fn connect(&self, events: Sender<FeedEvent>) -> KiteResult<()> {
        self.inner.stop.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("feed-poller".to_string())
            .spawn(move || poll_loop(inner, events))
            .map_err(|e| KiteError::Network(e.to_string()))?;
        Ok(())
    }

    fn subscribe(&self, tokens: &[InstrumentToken]) -> KiteResult<()> {
        let mut subs = self.inner.subscriptions.lock().unwrap();
        for &token in tokens {
            if subs.contains_key(&token) {
                continue;
            }
            match self.inner.db.symbol_for_token(token) {
                Ok(Some(symbol)) => {
                    subs.insert(token, format!("{}:{}", self.inner.exchange, symbol));
                }
                Ok(None) => {
                    warn!(token, "no instrument row for token; cannot poll it");
                }
                Err(e) => {
                    warn!(token, error = %e, "token reverse lookup failed");
                }
            }
        }
        Ok(())
    }

    fn set_mode(&self, mode: FeedMode, tokens: &[InstrumentToken]) -> KiteResult<()> {
        // Polling always yields LTP depth; nothing to switch.
        debug!(mode = mode.as_str(), count = tokens.len(), "set_mode ignored by polling feed");
        Ok(())
    }

    fn close(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
    }
}

fn poll_loop(inner: Arc<PollingInner>, events: Sender<FeedEvent>) {
    let _ = events.send(FeedEvent::Connected);
    let mut failures: u32 = 0;

    loop {
        if inner.stop.load(Ordering::SeqCst) {
            let _ = events.send(FeedEvent::Closed {
                code: 0,
                reason: "closed by engine".to_string(),
            });
            return;
        }

        let keys: Vec<String> = inner
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        if !keys.is_empty() {
            match inner.client.ltp(&keys) {
                Ok(quotes) => {
                    if failures > 0 {
                        // Recovered; replay the connect so the engine resubscribes.
                        let _ = events.send(FeedEvent::Connected);
                    }
                    failures = 0;
                    let ticks: Vec<Tick> = quotes
                        .into_values()
                        .map(|q| Tick::new(q.instrument_token, q.last_price))
                        .collect();
                    let _ = events.send(FeedEvent::Ticks(ticks));
                }
                Err(e) => {
                    failures += 1;
                    let _ = events.send(FeedEvent::Error {
                        code: 0,
                        reason: e.to_string(),
                    });
                    if failures > inner.max_failures {
                        let _ = events.send(FeedEvent::ReconnectExhausted);
                        return;
                    }
                    let _ = events.send(FeedEvent::Reconnecting { attempt: failures });
                }
            }
        }

        sleep_responsive(&inner.stop, inner.poll_interval);
    }
}

/// Sleep in slices so `close()` is honored promptly
fn sleep_responsive(stop: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

// ---------------------------------------------------------------------------
// SimFeed
// ---------------------------------------------------------------------------

struct SimInner {
    stop: AtomicBool,
    walk: Option<WalkParams>,
    subscribed: Mutex<Vec<InstrumentToken>>,
    events: Mutex<Option<Sender<FeedEvent>>>,
}

#[derive(Clone, Copy)]
struct WalkParams {
    start_price: f64,
    interval: Duration,
}

/// Simulated market-data feed
///
/// In manual mode the caller scripts every event through `push_ticks` /
/// `push_event`. In random-walk mode a generator thread drifts each
/// subscribed instrument's price by up to ±1% per interval.
#[derive(Clone)]
pub struct SimFeed {
    inner: Arc<SimInner>,
}

impl SimFeed {
    pub fn manual() -> Self {
        Self::build(None)
    }

    pub fn random_walk(start_price: f64, interval: Duration) -> Self {
        Self::build(Some(WalkParams {
            start_price,
            interval,
        }))
    }

    fn build(walk: Option<WalkParams>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                stop: AtomicBool::new(false),
                walk,
                subscribed: Mutex::new(Vec::new()),
                events: Mutex::new(None),
            }),
        }
    }

    pub fn push_ticks(&self, ticks: Vec<Tick>) {
        self.push_event(FeedEvent::Ticks(ticks));
    }

    pub fn push_event(&self, event: FeedEvent) {
        if let Some(sender) = self.inner.events.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }

    pub fn subscribed_tokens(&self) -> Vec<InstrumentToken> {
        self.inner.subscribed.lock().unwrap().clone()
    }
}

impl MarketFeed for SimFeed {
    fn connect(&self, events: Sender<FeedEvent>) -> KiteResult<()> {
        self.inner.stop.store(false, Ordering::SeqCst);
        let _ = events.send(FeedEvent::Connected);
        *self.inner.events.lock().unwrap() = Some(events.clone());

        if let Some(walk) = self.inner.walk {
            let inner = Arc::clone(&self.inner);
            thread::Builder::new()
                .name("sim-feed".to_string())
                .spawn(move || walk_loop(inner, events, walk))
                .map_err(|e| KiteError::Network(e.to_string()))?;
        }
        Ok(())
    }

    fn subscribe(&self, tokens: &[InstrumentToken]) -> KiteResult<()> {
        let mut subscribed = self.inner.subscribed.lock().unwrap();
        for &token in tokens {
            if !subscribed.contains(&token) {
                subscribed.push(token);
            }
        }
        Ok(())
    }

    fn set_mode(&self, _mode: FeedMode, _tokens: &[InstrumentToken]) -> KiteResult<()> {
        Ok(())
    }

    fn close(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.push_event(FeedEvent::Closed {
            code: 1000,
            reason: "closed".to_string(),
        });
    }
}

fn walk_loop(inner: Arc<SimInner>, events: Sender<FeedEvent>, walk: WalkParams) {
    let mut prices: HashMap<InstrumentToken, f64> = HashMap::new();
    let mut rng = rand::thread_rng();

    while !inner.stop.load(Ordering::SeqCst) {
        let tokens = inner.subscribed.lock().unwrap().clone();
        if !tokens.is_empty() {
            let mut ticks = Vec::with_capacity(tokens.len());
            for token in tokens {
                let price = prices.entry(token).or_insert(walk.start_price);
                *price *= 1.0 + rng.gen_range(-0.01..0.01);
                if *price < 0.05 {
                    *price = 0.05;
                }
                ticks.push(Tick::new(token, *price));
            }
            if events.send(FeedEvent::Ticks(ticks)).is_err() {
                return;
            }
        }
        thread::sleep(walk.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_sim_feed_connect_emits_connected() {
        let feed = SimFeed::manual();
        let (tx, rx) = unbounded();
        feed.connect(tx).unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            FeedEvent::Connected => {}
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn test_sim_feed_forwards_manual_ticks() {
        let feed = SimFeed::manual();
        let (tx, rx) = unbounded();
        feed.connect(tx).unwrap();
        let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap();

        feed.push_ticks(vec![Tick::new(42, 101.5)]);
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            FeedEvent::Ticks(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].instrument_token, 42);
            }
            other => panic!("expected Ticks, got {other:?}"),
        }
    }

    #[test]
    fn test_sim_feed_subscribe_dedupes() {
        let feed = SimFeed::manual();
        feed.subscribe(&[7, 7, 9]).unwrap();
        feed.subscribe(&[9]).unwrap();
        assert_eq!(feed.subscribed_tokens(), vec![7, 9]);
    }

    #[test]
    fn test_random_walk_generates_ticks_for_subscriptions() {
        let feed = SimFeed::random_walk(100.0, Duration::from_millis(5));
        feed.subscribe(&[11]).unwrap();
        let (tx, rx) = unbounded();
        feed.connect(tx).unwrap();
        let _ = rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let mut saw_tick = false;
        for _ in 0..20 {
            if let Ok(FeedEvent::Ticks(ticks)) = rx.recv_timeout(Duration::from_millis(200)) {
                assert_eq!(ticks[0].instrument_token, 11);
                assert!(ticks[0].last_price > 0.0);
                saw_tick = true;
                break;
            }
        }
        feed.close();
        assert!(saw_tick);
    }
}
