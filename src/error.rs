//! Engine error taxonomy

use crate::kite::KiteError;
use thiserror::Error;

/// Errors surfaced by engine entry points
///
/// Asynchronous pipeline stages (tick evaluation, persistence) never return
/// these to a caller; they log and carry on. Only the synchronous operations
/// (`start`, `add_order`, `modify_order`, `cancel_order`) propagate them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Feed unreachable or the connect handshake timed out. Fatal to `start()`.
    #[error("feed connection failed: {0}")]
    Connection(String),

    /// Malformed order or unresolvable instrument token. Rejects the single
    /// operation with no partial state change.
    #[error("invalid order: {0}")]
    Validation(String),

    /// Broker API request failed.
    #[error("broker request failed: {0}")]
    Broker(#[from] KiteError),

    /// Durable store access failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
