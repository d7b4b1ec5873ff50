//! SQLite order store
//!
//! The durable mirror of the engine's in-memory state: pending orders, their
//! execution history, and the instrument dump backing token resolution.
//! Connections are short-lived by design; every caller opens its own scope
//! and lets it drop when the work is done.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::error::EngineResult;
use crate::kite::types::{InstrumentRow, OrderUpdate};
use crate::types::{InstrumentToken, Order, OrderChanges, OrderId, OrderStatus};

/// Handle to the engine's SQLite database
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new short-lived connection
    pub fn connect(&self) -> EngineResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Create the order, execution, and instrument tables if missing
    pub fn init_schema(&self) -> EngineResult<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_orders (
                order_id INTEGER PRIMARY KEY,
                trading_symbol TEXT NOT NULL,
                instrument_token INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                order_type TEXT NOT NULL,
                limit_price REAL,
                trigger_price REAL,
                variety TEXT NOT NULL,
                product TEXT NOT NULL,
                validity TEXT NOT NULL,
                operation TEXT NOT NULL,
                execution_limit INTEGER NOT NULL,
                executions_done INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'PENDING',
                last_execution_price REAL,
                last_execution_time TEXT,
                exchange_order_id TEXT,
                exchange_update_time TEXT,
                completion_time TEXT,
                created_at TEXT NOT NULL,
                last_modified TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS order_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL,
                execution_price REAL NOT NULL,
                execution_time TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS instruments (
                instrument_token INTEGER NOT NULL,
                exchange_token INTEGER,
                trading_symbol TEXT NOT NULL UNIQUE,
                name TEXT,
                last_price REAL,
                expiry TEXT,
                strike REAL,
                tick_size REAL,
                lot_size INTEGER,
                instrument_type TEXT,
                segment TEXT,
                exchange TEXT
            )",
            [],
        )?;

        info!(path = %self.path.display(), "database schema ready");
        Ok(())
    }

    // -- instrument lookups --------------------------------------------------

    pub fn instrument_token(&self, symbol: &str) -> EngineResult<Option<InstrumentToken>> {
        let conn = self.connect()?;
        let token = conn
            .query_row(
                "SELECT instrument_token FROM instruments WHERE trading_symbol = ?1",
                params![symbol],
                |row| row.get::<_, InstrumentToken>(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn symbol_for_token(&self, token: InstrumentToken) -> EngineResult<Option<String>> {
        let conn = self.connect()?;
        let symbol = conn
            .query_row(
                "SELECT trading_symbol FROM instruments WHERE instrument_token = ?1",
                params![token],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(symbol)
    }

    /// Load the symbol -> token mapping for warm-starting the token cache
    pub fn load_symbol_tokens(&self) -> EngineResult<Vec<(String, InstrumentToken)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT trading_symbol, instrument_token FROM instruments")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Replace or insert instrument dump rows, returning how many landed
    pub fn upsert_instruments(&self, rows: &[InstrumentRow]) -> EngineResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO instruments (
                    instrument_token, exchange_token, trading_symbol, name,
                    last_price, expiry, strike, tick_size, lot_size,
                    instrument_type, segment, exchange
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(trading_symbol) DO UPDATE SET
                    instrument_token = excluded.instrument_token,
                    exchange_token = excluded.exchange_token,
                    name = excluded.name,
                    last_price = excluded.last_price,
                    expiry = excluded.expiry,
                    strike = excluded.strike,
                    tick_size = excluded.tick_size,
                    lot_size = excluded.lot_size,
                    instrument_type = excluded.instrument_type,
                    segment = excluded.segment,
                    exchange = excluded.exchange",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.instrument_token,
                    row.exchange_token,
                    row.tradingsymbol,
                    row.name,
                    row.last_price,
                    row.expiry,
                    row.strike,
                    row.tick_size,
                    row.lot_size,
                    row.instrument_type,
                    row.segment,
                    row.exchange,
                ])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    // -- order reads ---------------------------------------------------------

    /// Orders still live on the exchange side: PENDING or PARTIALLY_EXECUTED
    pub fn load_active_orders(&self) -> EngineResult<Vec<Order>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT order_id, trading_symbol, instrument_token, quantity, order_type,
                    limit_price, trigger_price, variety, product, validity, operation,
                    execution_limit, executions_done, status, created_at
             FROM pending_orders
             WHERE status IN ('PENDING', 'PARTIALLY_EXECUTED')",
        )?;
        let orders = stmt
            .query_map([], row_to_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    pub fn order_row(&self, order_id: OrderId) -> EngineResult<Option<Order>> {
        let conn = self.connect()?;
        let order = conn
            .query_row(
                "SELECT order_id, trading_symbol, instrument_token, quantity, order_type,
                        limit_price, trigger_price, variety, product, validity, operation,
                        execution_limit, executions_done, status, created_at
                 FROM pending_orders WHERE order_id = ?1",
                params![order_id],
                row_to_order,
            )
            .optional()?;
        Ok(order)
    }

    pub fn execution_count(&self, order_id: OrderId) -> EngineResult<u32> {
        let conn = self.connect()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM order_executions WHERE order_id = ?1",
            params![order_id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    // -- guarded order writes (intake path) ----------------------------------

    /// Apply a modification iff the order is still PENDING. Returns whether a
    /// row changed.
    pub fn modify_pending(
        &self,
        order_id: OrderId,
        changes: &OrderChanges,
        instrument_token: InstrumentToken,
    ) -> EngineResult<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE pending_orders SET
                trading_symbol = ?1,
                instrument_token = ?2,
                quantity = ?3,
                order_type = ?4,
                limit_price = ?5,
                trigger_price = ?6,
                variety = ?7,
                product = ?8,
                validity = ?9,
                operation = ?10,
                last_modified = ?11
             WHERE order_id = ?12 AND status = 'PENDING'",
            params![
                changes.trading_symbol,
                instrument_token,
                changes.quantity,
                changes.order_type.as_str(),
                changes.limit_price,
                changes.trigger_price,
                changes.variety,
                changes.product,
                changes.validity,
                changes.operation.as_str(),
                Utc::now().to_rfc3339(),
                order_id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Cancel iff still PENDING. Returns whether a row changed.
    pub fn cancel_pending(&self, order_id: OrderId) -> EngineResult<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE pending_orders SET status = 'CANCELLED', last_modified = ?1
             WHERE order_id = ?2 AND status = 'PENDING'",
            params![Utc::now().to_rfc3339(), order_id],
        )?;
        Ok(rows > 0)
    }

    // -- statements applied by the persistence workers -----------------------

    pub fn insert_order(conn: &Connection, order: &Order) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO pending_orders (
                order_id, trading_symbol, instrument_token, quantity, order_type,
                limit_price, trigger_price, variety, product, validity, operation,
                execution_limit, executions_done, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                order.order_id,
                order.trading_symbol,
                order.instrument_token,
                order.quantity,
                order.order_type.as_str(),
                order.limit_price,
                order.trigger_price,
                order.variety,
                order.product,
                order.validity,
                order.operation.as_str(),
                order.execution_limit,
                order.executions_done,
                order.status.as_str(),
                order.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record one fill and advance the order's counters in a single
    /// transaction. The status flips to COMPLETED exactly when the
    /// incremented count reaches the execution limit.
    pub fn record_execution(
        conn: &mut Connection,
        order_id: OrderId,
        price: f64,
    ) -> rusqlite::Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO order_executions (order_id, execution_price, execution_time)
             VALUES (?1, ?2, ?3)",
            params![order_id, price, now],
        )?;
        tx.execute(
            "UPDATE pending_orders SET
                executions_done = executions_done + 1,
                last_execution_price = ?1,
                last_execution_time = ?2,
                status = CASE
                    WHEN executions_done + 1 >= execution_limit THEN 'COMPLETED'
                    ELSE 'PARTIALLY_EXECUTED'
                END
             WHERE order_id = ?3",
            params![price, now, order_id],
        )?;
        tx.commit()
    }

    pub fn apply_broker_status(conn: &Connection, update: &OrderUpdate) -> rusqlite::Result<()> {
        // Only terminal broker statuses map onto the engine's state machine;
        // interim ones (OPEN, TRIGGER PENDING, ...) update the exchange
        // bookkeeping columns and leave the status untouched.
        let mapped = update.terminal_status().map(|status| status.as_str());
        conn.execute(
            "UPDATE pending_orders SET
                status = COALESCE(?1, status),
                exchange_order_id = ?2,
                exchange_update_time = ?3,
                last_modified = ?4
             WHERE order_id = ?5",
            params![
                mapped,
                update.exchange_order_id,
                update.exchange_timestamp,
                Utc::now().to_rfc3339(),
                update.order_id,
            ],
        )?;
        Ok(())
    }

    pub fn mark_complete(
        conn: &Connection,
        order_id: OrderId,
        status: OrderStatus,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE pending_orders SET status = ?1, completion_time = ?2
             WHERE order_id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), order_id],
        )?;
        Ok(())
    }
}

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        order_id: row.get(0)?,
        trading_symbol: row.get(1)?,
        instrument_token: row.get(2)?,
        quantity: row.get(3)?,
        order_type: parse_column(row, 4)?,
        limit_price: row.get(5)?,
        trigger_price: row.get(6)?,
        variety: row.get(7)?,
        product: row.get(8)?,
        validity: row.get(9)?,
        operation: parse_column(row, 10)?,
        execution_limit: row.get(11)?,
        executions_done: row.get(12)?,
        status: parse_column(row, 13)?,
        created_at: parse_timestamp(row, 14)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })
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

    fn sample_order(order_id: OrderId, execution_limit: u32) -> Order {
        Order::new(
            OrderRequest {
                order_id,
                trading_symbol: "EDELWEISS".to_string(),
                quantity: 1,
                order_type: OrderType::Market,
                limit_price: None,
                trigger_price: None,
                variety: "regular".to_string(),
                product: "CNC".to_string(),
                validity: "DAY".to_string(),
                operation: Operation::Buy,
                execution_limit,
            },
            98049,
        )
    }

    fn changes() -> OrderChanges {
        OrderChanges {
            trading_symbol: "EDELWEISS".to_string(),
            quantity: 5,
            order_type: OrderType::Market,
            limit_price: None,
            trigger_price: None,
            variety: "regular".to_string(),
            product: "CNC".to_string(),
            validity: "DAY".to_string(),
            operation: Operation::Buy,
        }
    }

    #[test]
    fn test_insert_and_load_round_trip() {
        let (db, _dir) = scratch_db();
        let order = sample_order(1, 2);
        let conn = db.connect().unwrap();
        Database::insert_order(&conn, &order).unwrap();

        let loaded = db.order_row(1).unwrap().unwrap();
        assert_eq!(loaded.trading_symbol, "EDELWEISS");
        assert_eq!(loaded.instrument_token, 98049);
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert_eq!(loaded.executions_done, 0);

        let active = db.load_active_orders().unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_record_execution_advances_status() {
        let (db, _dir) = scratch_db();
        let order = sample_order(7, 2);
        {
            let conn = db.connect().unwrap();
            Database::insert_order(&conn, &order).unwrap();
        }

        let mut conn = db.connect().unwrap();
        Database::record_execution(&mut conn, 7, 101.5).unwrap();
        let row = db.order_row(7).unwrap().unwrap();
        assert_eq!(row.executions_done, 1);
        assert_eq!(row.status, OrderStatus::PartiallyExecuted);

        Database::record_execution(&mut conn, 7, 102.5).unwrap();
        let row = db.order_row(7).unwrap().unwrap();
        assert_eq!(row.executions_done, 2);
        assert_eq!(row.status, OrderStatus::Completed);
        assert_eq!(db.execution_count(7).unwrap(), 2);
    }

    #[test]
    fn test_modify_guard_rejects_non_pending() {
        let (db, _dir) = scratch_db();
        let order = sample_order(3, 1);
        {
            let mut conn = db.connect().unwrap();
            Database::insert_order(&conn, &order).unwrap();
            Database::record_execution(&mut conn, 3, 99.0).unwrap();
        }

        assert!(!db.modify_pending(3, &changes(), 98049).unwrap());
        let row = db.order_row(3).unwrap().unwrap();
        assert_eq!(row.quantity, 1);
    }

    #[test]
    fn test_modify_pending_applies() {
        let (db, _dir) = scratch_db();
        let order = sample_order(4, 1);
        {
            let conn = db.connect().unwrap();
            Database::insert_order(&conn, &order).unwrap();
        }

        assert!(db.modify_pending(4, &changes(), 98049).unwrap());
        let row = db.order_row(4).unwrap().unwrap();
        assert_eq!(row.quantity, 5);
    }

    #[test]
    fn test_cancel_guard() {
        let (db, _dir) = scratch_db();
        {
            let conn = db.connect().unwrap();
            Database::insert_order(&conn, &sample_order(5, 1)).unwrap();
        }

        assert!(db.cancel_pending(5).unwrap());
        assert_eq!(db.order_row(5).unwrap().unwrap().status, OrderStatus::Cancelled);
        // Second cancel finds nothing PENDING.
        assert!(!db.cancel_pending(5).unwrap());
    }

    #[test]
    fn test_instrument_upsert_and_lookup() {
        let (db, _dir) = scratch_db();
        let rows = vec![InstrumentRow {
            instrument_token: 408065,
            exchange_token: 1594,
            tradingsymbol: "INFY".to_string(),
            name: "INFOSYS".to_string(),
            last_price: 1520.5,
            expiry: String::new(),
            strike: 0.0,
            tick_size: 0.05,
            lot_size: 1,
            instrument_type: "EQ".to_string(),
            segment: "NSE".to_string(),
            exchange: "NSE".to_string(),
        }];
        assert_eq!(db.upsert_instruments(&rows).unwrap(), 1);
        assert_eq!(db.instrument_token("INFY").unwrap(), Some(408065));
        assert_eq!(db.symbol_for_token(408065).unwrap().as_deref(), Some("INFY"));

        // Upsert with a new token replaces the old row.
        let mut updated = rows;
        updated[0].instrument_token = 500001;
        db.upsert_instruments(&updated).unwrap();
        assert_eq!(db.instrument_token("INFY").unwrap(), Some(500001));
        assert_eq!(db.load_symbol_tokens().unwrap().len(), 1);
    }
}
