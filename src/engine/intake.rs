//! Order intake pipeline
//!
//! Admission, modification, and cancellation of conditional orders. All
//! three surface their outcome synchronously to the caller; indexing and
//! feed subscription run on their own worker so admission never waits on
//! them.

use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use super::EngineShared;
use crate::error::{EngineError, EngineResult};
use crate::types::{InstrumentToken, Order, OrderChanges, OrderId, OrderRequest};

/// Queued admission consumed by the indexing worker
#[derive(Debug, Clone, Copy)]
pub(crate) struct Admission {
    pub(crate) order_id: OrderId,
}

/// Admit a new order
///
/// Resolves the instrument token (cache, then durable store, then live
/// lookup), caches the order, queues the durable insert, and queues the
/// admission for the indexing worker, which appends the index entry and
/// subscribes the instrument so neither blocks this caller. Token resolution
/// failure rejects the whole admission before any state is touched.
pub(crate) fn add_order(shared: &EngineShared, request: OrderRequest) -> EngineResult<()> {
    validate(&request)?;

    let token = resolve_token(shared, &request.trading_symbol)?;
    let order = Order::new(request, token);
    let order_id = order.order_id;
    info!(order_id, symbol = %order.trading_symbol, token, "admitting order");

    shared
        .order_cache
        .lock()
        .unwrap()
        .put(order_id, order.clone());
    let _ = shared.db_tx.send(super::DbJob::InsertOrder(order));
    let _ = shared.intake_tx.send(Admission { order_id });
    Ok(())
}

/// Modify an order while it is still PENDING
///
/// The durable update carries the guard; when it matches no row the call is
/// a logged no-op. A changed trading symbol re-resolves the instrument token
/// and re-points the index and feed subscription.
pub(crate) fn modify_order(
    shared: &EngineShared,
    order_id: OrderId,
    changes: OrderChanges,
) -> EngineResult<bool> {
    let lock = shared.lock_for(order_id);
    let _guard = lock.lock().unwrap();

    let current = shared.cached_order(order_id);
    let token = match &current {
        Some(order) if order.trading_symbol == changes.trading_symbol => order.instrument_token,
        _ => resolve_token(shared, &changes.trading_symbol)?,
    };

    if !shared.db.modify_pending(order_id, &changes, token)? {
        warn!(order_id, "modify ignored: order not found or no longer PENDING");
        return Ok(false);
    }

    let mut order_cache = shared.order_cache.lock().unwrap();
    if let Some(order) = order_cache.get_mut(&order_id) {
        let previous_token = order.instrument_token;
        order.apply_changes(&changes, token);
        drop(order_cache);

        if previous_token != token {
            shared.remove_from_index(previous_token, order_id);
            shared.index.entry(token).or_default().push(order_id);
            shared.ensure_subscribed(token)?;
        }
    }
    info!(order_id, "order modified");
    Ok(true)
}

/// Cancel an order while it is still PENDING
///
/// On success the order leaves the live cache immediately; its index entry
/// may lag and is filtered out at evaluation time.
pub(crate) fn cancel_order(shared: &EngineShared, order_id: OrderId) -> EngineResult<bool> {
    let lock = shared.lock_for(order_id);
    let _guard = lock.lock().unwrap();

    if !shared.db.cancel_pending(order_id)? {
        warn!(order_id, "cancel ignored: order not found or no longer PENDING");
        return Ok(false);
    }

    shared.order_cache.lock().unwrap().remove(&order_id);
    shared.order_locks.remove(&order_id);
    info!(order_id, "order cancelled");
    Ok(true)
}

fn validate(request: &OrderRequest) -> EngineResult<()> {
    if request.quantity == 0 {
        return Err(EngineError::Validation("quantity must be positive".into()));
    }
    if request.execution_limit == 0 {
        return Err(EngineError::Validation(
            "execution_limit must be positive".into(),
        ));
    }
    if request.order_type.requires_limit_price() && request.limit_price.is_none() {
        return Err(EngineError::Validation(format!(
            "{} orders require a limit price",
            request.order_type.as_str()
        )));
    }
    if request.order_type.requires_trigger_price() && request.trigger_price.is_none() {
        return Err(EngineError::Validation(format!(
            "{} orders require a trigger price",
            request.order_type.as_str()
        )));
    }
    Ok(())
}

/// Read-through instrument token resolution: cache, durable store, then a
/// live LTP lookup. Every miss populates the cache on its way back.
pub(crate) fn resolve_token(shared: &EngineShared, symbol: &str) -> EngineResult<InstrumentToken> {
    if let Some(token) = shared.instrument_cache.lock().unwrap().get(&symbol.to_string()) {
        return Ok(*token);
    }

    if let Some(token) = shared.db.instrument_token(symbol)? {
        shared
            .instrument_cache
            .lock()
            .unwrap()
            .put(symbol.to_string(), token);
        return Ok(token);
    }

    let key = format!("{}:{}", shared.exchange, symbol);
    let quotes = shared.broker.ltp(&[key.clone()]).map_err(|e| {
        EngineError::Validation(format!("could not resolve instrument token for {symbol}: {e}"))
    })?;
    let token = quotes
        .get(&key)
        .map(|quote| quote.instrument_token)
        .ok_or_else(|| {
            EngineError::Validation(format!("no instrument found for symbol {symbol}"))
        })?;

    shared
        .instrument_cache
        .lock()
        .unwrap()
        .put(symbol.to_string(), token);
    debug!(symbol, token, "instrument token resolved via live lookup");
    Ok(token)
}

/// Indexing worker: drains queued admissions into the instrument -> orders
/// index and subscribes the instrument on the feed, so `add_order` never
/// blocks on either.
pub(crate) fn indexing_worker(shared: Arc<EngineShared>) {
    while shared.is_running() {
        match shared.intake_rx.recv_timeout(shared.poll_timeout) {
            Ok(admission) => {
                // A modification may have moved the order to another token
                // between admission and here; index whatever the cache says
                // now. An order already gone terminal is not indexed at all.
                let token = match shared.cached_order(admission.order_id) {
                    Some(order) => order.instrument_token,
                    None => continue,
                };
                {
                    let mut ids = shared.index.entry(token).or_default();
                    if !ids.contains(&admission.order_id) {
                        ids.push(admission.order_id);
                    }
                }
                if let Err(e) = shared.ensure_subscribed(token) {
                    warn!(token, error = %e, "feed subscription failed for admitted order");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
