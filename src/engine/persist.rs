//! Durable-write queue and persistence worker pool
//!
//! Tick workers, intake, and the feed adapter never talk to the database on
//! their hot paths; they enqueue a `DbJob` and move on. A fixed pool drains
//! the queue, opening a short-lived connection per job. Failed writes are
//! logged with their full context and dropped: in-memory state stays
//! authoritative for the running process even when durability is degraded.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, error, info};

use super::EngineShared;
use crate::db::Database;
use crate::kite::types::OrderUpdate;
use crate::types::{Order, OrderId, OrderStatus};

/// One queued instruction against the durable store
#[derive(Debug, Clone)]
pub enum DbJob {
    /// Admit a freshly accepted order
    InsertOrder(Order),
    /// Record one fill and advance the order's counters
    RecordExecution { order_id: OrderId, price: f64 },
    /// Mirror a broker push notification
    BrokerStatus(OrderUpdate),
    /// Seal a terminal state
    Complete { order_id: OrderId, status: OrderStatus },
}

impl fmt::Display for DbJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbJob::InsertOrder(order) => write!(f, "insert order {}", order.order_id),
            DbJob::RecordExecution { order_id, price } => {
                write!(f, "record execution of order {order_id} at {price}")
            }
            DbJob::BrokerStatus(update) => {
                write!(f, "broker status {} for order {}", update.status, update.order_id)
            }
            DbJob::Complete { order_id, status } => {
                write!(f, "complete order {order_id} as {status}")
            }
        }
    }
}

impl DbJob {
    fn apply(&self, db: &Database) -> crate::error::EngineResult<()> {
        let mut conn = db.connect()?;
        match self {
            DbJob::InsertOrder(order) => Database::insert_order(&conn, order)?,
            DbJob::RecordExecution { order_id, price } => {
                Database::record_execution(&mut conn, *order_id, *price)?
            }
            DbJob::BrokerStatus(update) => Database::apply_broker_status(&conn, update)?,
            DbJob::Complete { order_id, status } => {
                Database::mark_complete(&conn, *order_id, *status)?
            }
        }
        Ok(())
    }
}

/// Persistence worker loop
pub(crate) fn db_worker(shared: Arc<EngineShared>) {
    info!("persistence worker started");

    while shared.is_running() {
        match shared.db_rx.recv_timeout(shared.poll_timeout) {
            Ok(job) => run_job(&shared, job),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Flush whatever was queued before the running flag cleared.
    let mut drained = 0;
    while let Ok(job) = shared.db_rx.try_recv() {
        run_job(&shared, job);
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "persistence queue flushed on shutdown");
    }
    info!("persistence worker stopped");
}

fn run_job(shared: &EngineShared, job: DbJob) {
    if let Err(e) = job.apply(&shared.db) {
        error!(job = %job, error = %e, "durable write failed; job dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, OrderRequest, OrderType};
    use tempfile::TempDir;

    fn scratch_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("orders.db"));
        db.init_schema().unwrap();
        (db, dir)
    }

    fn order(id: OrderId) -> Order {
        Order::new(
            OrderRequest {
                order_id: id,
                trading_symbol: "SBIN".to_string(),
                quantity: 2,
                order_type: OrderType::Market,
                limit_price: None,
                trigger_price: None,
                variety: "regular".to_string(),
                product: "CNC".to_string(),
                validity: "DAY".to_string(),
                operation: Operation::Sell,
                execution_limit: 1,
            },
            779521,
        )
    }

    #[test]
    fn test_jobs_apply_in_sequence() {
        let (db, _dir) = scratch_db();

        DbJob::InsertOrder(order(11)).apply(&db).unwrap();
        DbJob::RecordExecution {
            order_id: 11,
            price: 612.3,
        }
        .apply(&db)
        .unwrap();

        let row = db.order_row(11).unwrap().unwrap();
        assert_eq!(row.executions_done, 1);
        assert_eq!(row.status, OrderStatus::Completed);
    }

    #[test]
    fn test_broker_status_job_updates_row() {
        let (db, _dir) = scratch_db();
        DbJob::InsertOrder(order(12)).apply(&db).unwrap();

        DbJob::BrokerStatus(OrderUpdate {
            order_id: 12,
            status: "REJECTED".to_string(),
            exchange_order_id: Some("X123".to_string()),
            exchange_timestamp: None,
        })
        .apply(&db)
        .unwrap();

        let row = db.order_row(12).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Rejected);
    }

    #[test]
    fn test_complete_job_seals_status() {
        let (db, _dir) = scratch_db();
        DbJob::InsertOrder(order(13)).apply(&db).unwrap();
        DbJob::Complete {
            order_id: 13,
            status: OrderStatus::Completed,
        }
        .apply(&db)
        .unwrap();

        let row = db.order_row(13).unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Completed);
    }

    #[test]
    fn test_job_display_context() {
        let job = DbJob::RecordExecution {
            order_id: 5,
            price: 99.5,
        };
        assert_eq!(job.to_string(), "record execution of order 5 at 99.5");
    }
}
