//! Configuration management
//!
//! Loads a JSON configuration file with environment variable support for
//! broker credentials. Every section has working defaults so a partial file
//! (or none at all) yields a runnable paper-trading setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.merge_env();
        Ok(config)
    }

    /// Load API credentials from the environment if not set in the file
    pub fn merge_env(&mut self) {
        if let Ok(api_key) = std::env::var("KITE_API_KEY") {
            self.broker.api_key = Some(api_key);
        }
        if let Ok(access_token) = std::env::var("KITE_ACCESS_TOKEN") {
            self.broker.access_token = Some(access_token);
        }
    }
}

/// Broker connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Exchange segment orders are routed to
    pub exchange: String,
    /// Broker API requests per second
    pub rate_limit: u32,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
    /// Market-data poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive failed polls tolerated before the feed gives up
    pub max_reconnect_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            api_key: None,
            access_token: None,
            exchange: "NSE".to_string(),
            rate_limit: 10,
            timeout_secs: 30,
            poll_interval_ms: 1000,
            max_reconnect_attempts: 50,
        }
    }
}

/// Worker pool and cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tick worker threads; 0 selects one less than the available cores
    pub tick_workers: usize,
    /// Persistence worker threads
    pub db_workers: usize,
    /// Bounded wait on queue pops in milliseconds; every worker revisits the
    /// running flag at this cadence
    pub queue_poll_ms: u64,
    /// How long `start()` waits for the feed handshake, in seconds
    pub connect_timeout_secs: u64,
    /// Cache sweep cadence in seconds
    pub janitor_interval_secs: u64,
    pub instrument_cache_size: usize,
    pub instrument_ttl_secs: u64,
    pub tick_cache_size: usize,
    pub tick_ttl_secs: u64,
    pub order_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_workers: 0,
            db_workers: 2,
            queue_poll_ms: 1000,
            connect_timeout_secs: 10,
            janitor_interval_secs: 300,
            instrument_cache_size: 1000,
            instrument_ttl_secs: 24 * 60 * 60,
            tick_cache_size: 5000,
            tick_ttl_secs: 300,
            order_cache_size: 10_000,
        }
    }
}

impl EngineConfig {
    /// Resolve the configured tick worker count against the host
    pub fn effective_tick_workers(&self) -> usize {
        if self.tick_workers > 0 {
            return self.tick_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(2)
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "orders.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.broker.exchange, "NSE");
        assert_eq!(config.engine.db_workers, 2);
        assert_eq!(config.engine.tick_ttl_secs, 300);
        assert_eq!(config.engine.instrument_ttl_secs, 86400);
        assert_eq!(config.database.path, "orders.db");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "engine": { "tick_workers": 4, "db_workers": 1, "queue_poll_ms": 100,
                 "connect_timeout_secs": 5, "janitor_interval_secs": 60,
                 "instrument_cache_size": 10, "instrument_ttl_secs": 60,
                 "tick_cache_size": 10, "tick_ttl_secs": 10, "order_cache_size": 10 } }"#,
        )
        .unwrap();
        assert_eq!(config.engine.tick_workers, 4);
        assert_eq!(config.broker.rate_limit, 10);
    }

    #[test]
    fn test_effective_tick_workers_explicit() {
        let engine = EngineConfig {
            tick_workers: 3,
            ..EngineConfig::default()
        };
        assert_eq!(engine.effective_tick_workers(), 3);
    }

    #[test]
    fn test_effective_tick_workers_auto_is_positive() {
        let engine = EngineConfig::default();
        assert!(engine.effective_tick_workers() >= 1);
    }
}
