//! Paper broker
//!
//! Accepts every order without touching the exchange and synthesizes stable
//! instrument tokens, so the engine can run end-to-end with no credentials.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::error::KiteResult;
use super::types::{LtpQuote, PlaceOrderParams};
use super::BrokerClient;
use crate::types::InstrumentToken;

const PAPER_BASE_PRICE: f64 = 100.0;

pub struct PaperBroker {
    sequence: AtomicU64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(1),
        }
    }

    /// Deterministic token derived from the symbol part of an LTP key
    fn synthetic_token(key: &str) -> InstrumentToken {
        let symbol = key.split_once(':').map(|(_, s)| s).unwrap_or(key);
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() & 0x7fff_ffff) as InstrumentToken
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient for PaperBroker {
    fn place_order(&self, params: &PlaceOrderParams) -> KiteResult<String> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let reference = format!("PAPER-{seq}");
        info!(
            symbol = %params.trading_symbol,
            side = params.transaction_type.as_str(),
            quantity = params.quantity,
            order_type = params.order_type.as_str(),
            reference = %reference,
            "paper order accepted"
        );
        Ok(reference)
    }

    fn ltp(&self, keys: &[String]) -> KiteResult<HashMap<String, LtpQuote>> {
        Ok(keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    LtpQuote {
                        instrument_token: Self::synthetic_token(key),
                        last_price: PAPER_BASE_PRICE,
                    },
                )
            })
            .collect())
    }
}
