//! Tick processing worker pool
//!
//! Each worker drains the shared tick queue: cache the tick, publish the
//! last price, then evaluate every order indexed against the instrument.
//! Work on a single order is serialized by its per-order mutex, held across
//! the re-read, the trigger evaluation, the blocking execution call, and the
//! write-back, so two workers observing ticks for the same instrument can
//! never double-execute one order.

use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info};

use super::{DbJob, EngineShared};
use crate::kite::types::PlaceOrderParams;
use crate::types::{Operation, Order, OrderStatus, Tick};

/// Whether this tick's price satisfies the order's trigger condition
pub(crate) fn should_execute(order: &Order, price: f64) -> bool {
    use crate::types::OrderType::*;

    match order.order_type {
        Market => true,
        Limit => match (order.operation, order.limit_price) {
            (Operation::Buy, Some(limit)) => price <= limit,
            (Operation::Sell, Some(limit)) => price >= limit,
            _ => false,
        },
        Sl | SlM => match (order.operation, order.trigger_price) {
            (Operation::Buy, Some(trigger)) => price >= trigger,
            (Operation::Sell, Some(trigger)) => price <= trigger,
            _ => false,
        },
    }
}

/// Tick worker loop
pub(crate) fn tick_worker(shared: Arc<EngineShared>) {
    info!("tick worker started");
    while shared.is_running() {
        match shared.tick_rx.recv_timeout(shared.poll_timeout) {
            Ok(tick) => process_tick(&shared, tick),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("tick worker stopped");
}

fn process_tick(shared: &EngineShared, tick: Tick) {
    let token = tick.instrument_token;
    shared.tick_cache.lock().unwrap().put(token, tick.clone());
    shared.last_prices.insert(token, tick.last_price);

    let order_ids: Vec<_> = shared
        .index
        .get(&token)
        .map(|ids| ids.clone())
        .unwrap_or_default();
    if order_ids.is_empty() {
        return;
    }

    let mut stale = Vec::new();
    for order_id in order_ids {
        let lock = shared.lock_for(order_id);
        let _guard = lock.lock().unwrap();

        // Re-read under the lock; a concurrent worker, cancel, or broker
        // update may have changed or evicted the order since the snapshot.
        match shared.cached_order(order_id) {
            Some(order) => evaluate_order(shared, order, &tick),
            None => stale.push(order_id),
        }
    }

    // Entries whose orders left the cache (cancelled, completed elsewhere)
    // are pruned here rather than at removal time.
    for order_id in stale {
        shared.remove_from_index(token, order_id);
        shared.order_locks.remove(&order_id);
    }
}

fn evaluate_order(shared: &EngineShared, mut order: Order, tick: &Tick) {
    let order_id = order.order_id;

    if order.executions_done >= order.execution_limit {
        info!(order_id, "execution limit already reached");
        shared.complete_order(order_id, OrderStatus::Completed);
        return;
    }

    if !should_execute(&order, tick.last_price) {
        return;
    }

    let params = PlaceOrderParams::from_order(&order, &shared.exchange);
    match shared.broker.place_order(&params) {
        Ok(reference) => {
            info!(
                order_id,
                symbol = %order.trading_symbol,
                price = tick.last_price,
                broker_ref = %reference,
                executions_done = order.executions_done + 1,
                "order executed"
            );
        }
        Err(e) => {
            // Left untouched; the next qualifying tick retries.
            error!(
                order_id,
                symbol = %order.trading_symbol,
                side = order.operation.as_str(),
                order_type = order.order_type.as_str(),
                quantity = order.quantity,
                price = tick.last_price,
                error = %e,
                "order placement failed"
            );
            return;
        }
    }

    order.executions_done += 1;
    let _ = shared.db_tx.send(DbJob::RecordExecution {
        order_id,
        price: tick.last_price,
    });

    if order.executions_done >= order.execution_limit {
        shared.complete_order(order_id, OrderStatus::Completed);
    } else {
        order.status = OrderStatus::PartiallyExecuted;
        debug!(order_id, executions_done = order.executions_done, "order partially executed");
        shared.order_cache.lock().unwrap().put(order_id, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderRequest, OrderType};

    fn order(order_type: OrderType, operation: Operation, limit: Option<f64>, trigger: Option<f64>) -> Order {
        Order::new(
            OrderRequest {
                order_id: 1,
                trading_symbol: "X".to_string(),
                quantity: 10,
                order_type,
                limit_price: limit,
                trigger_price: trigger,
                variety: "regular".to_string(),
                product: "CNC".to_string(),
                validity: "DAY".to_string(),
                operation,
                execution_limit: 1,
            },
            1,
        )
    }

    #[test]
    fn test_market_always_eligible() {
        let o = order(OrderType::Market, Operation::Buy, None, None);
        assert!(should_execute(&o, 0.05));
        assert!(should_execute(&o, 1_000_000.0));
    }

    #[test]
    fn test_limit_buy_at_or_below_limit() {
        let o = order(OrderType::Limit, Operation::Buy, Some(100.0), None);
        assert!(!should_execute(&o, 105.0));
        assert!(should_execute(&o, 99.0));
        assert!(should_execute(&o, 100.0));
    }

    #[test]
    fn test_limit_sell_at_or_above_limit() {
        let o = order(OrderType::Limit, Operation::Sell, Some(100.0), None);
        assert!(!should_execute(&o, 99.0));
        assert!(should_execute(&o, 101.0));
    }

    #[test]
    fn test_stop_loss_sell_at_or_below_trigger() {
        let o = order(OrderType::Sl, Operation::Sell, Some(49.0), Some(50.0));
        assert!(!should_execute(&o, 55.0));
        assert!(should_execute(&o, 49.0));
    }

    #[test]
    fn test_stop_loss_buy_at_or_above_trigger() {
        let o = order(OrderType::SlM, Operation::Buy, None, Some(1650.0));
        assert!(!should_execute(&o, 1600.0));
        assert!(should_execute(&o, 1651.0));
    }

    #[test]
    fn test_missing_price_is_never_eligible() {
        let o = order(OrderType::Limit, Operation::Buy, None, None);
        assert!(!should_execute(&o, 1.0));
        let o = order(OrderType::Sl, Operation::Sell, None, None);
        assert!(!should_execute(&o, 1.0));
    }
}
