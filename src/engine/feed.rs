//! Feed adapter
//!
//! Consumes typed events from the market-data channel and translates them
//! into engine actions: readiness signaling, resubscription, tick hand-off,
//! broker order-update mirroring, and shutdown on reconnect exhaustion.
//! The tick path is a pure hand-off; no cache or database work happens here.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use super::{DbJob, EngineShared};
use crate::kite::feed::{FeedEvent, FeedMode};
use crate::kite::types::OrderUpdate;

/// Feed adapter loop
pub(crate) fn feed_adapter(shared: Arc<EngineShared>, events: Receiver<FeedEvent>) {
    while shared.is_running() {
        match events.recv_timeout(shared.poll_timeout) {
            Ok(event) => handle_event(&shared, event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_event(shared: &EngineShared, event: FeedEvent) {
    match event {
        FeedEvent::Connected => {
            shared.ready.set();
            resubscribe(shared);
        }
        FeedEvent::Closed { code, reason } => {
            shared.ready.clear();
            warn!(code, reason = %reason, "market data channel closed");
        }
        FeedEvent::Error { code, reason } => {
            error!(code, reason = %reason, "market data channel error");
        }
        FeedEvent::Reconnecting { attempt } => {
            info!(attempt, "market data channel reconnecting");
        }
        FeedEvent::ReconnectExhausted => {
            error!("market data reconnection attempts exhausted; shutting engine down");
            shared.running.store(false, Ordering::SeqCst);
            shared.feed.close();
        }
        FeedEvent::Ticks(ticks) => {
            for tick in ticks {
                let _ = shared.tick_tx.send(tick);
            }
        }
        FeedEvent::OrderUpdate(update) => handle_order_update(shared, update),
    }
}

fn resubscribe(shared: &EngineShared) {
    let tokens: Vec<_> = shared.subscribed.iter().map(|token| *token).collect();
    info!(instruments = tokens.len(), "market data channel connected");
    if tokens.is_empty() {
        return;
    }
    if let Err(e) = shared.feed.subscribe(&tokens) {
        error!(error = %e, "resubscription failed");
        return;
    }
    if let Err(e) = shared.feed.set_mode(FeedMode::Full, &tokens) {
        error!(error = %e, "set_mode failed after resubscription");
    }
}

/// Mirror a broker push notification.
///
/// The durable write is queued like any other, but a terminal status
/// completes the order synchronously here so the in-memory view can never
/// lag a terminal broker-reported outcome.
fn handle_order_update(shared: &EngineShared, update: OrderUpdate) {
    let known = shared
        .order_cache
        .lock()
        .unwrap()
        .contains_key(&update.order_id);
    if !known {
        return;
    }

    info!(order_id = update.order_id, status = %update.status, "broker order update");
    let _ = shared.db_tx.send(DbJob::BrokerStatus(update.clone()));

    if let Some(status) = update.terminal_status() {
        let lock = shared.lock_for(update.order_id);
        let _guard = lock.lock().unwrap();
        shared.complete_order(update.order_id, status);
    }
}
