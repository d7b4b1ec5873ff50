//! Sync Instruments Command
//!
//! Downloads the exchange's full instrument dump from the broker and upserts
//! it into the local `instruments` table, which backs instrument token
//! resolution before any live lookup is attempted.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use order_engine::kite::{ClientConfig, Credentials, KiteClient};
use order_engine::{Config, Database};

pub fn run(config_path: String, exchange: Option<String>) -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    let exchange = exchange.unwrap_or_else(|| config.broker.exchange.clone());

    let api_key = config
        .broker
        .api_key
        .clone()
        .context("instrument sync requires broker.api_key or KITE_API_KEY")?;
    let access_token = config
        .broker
        .access_token
        .clone()
        .context("instrument sync requires broker.access_token or KITE_ACCESS_TOKEN")?;

    let client = KiteClient::with_config(
        Credentials::new(api_key, access_token),
        ClientConfig::default()
            .with_timeout(Duration::from_secs(config.broker.timeout_secs))
            .with_rate_limit(config.broker.rate_limit as usize),
    );

    let db = Database::new(&config.database.path);
    db.init_schema()?;

    info!(exchange = %exchange, "downloading instrument dump");
    let rows = client.instruments(&exchange)?;
    info!(fetched = rows.len(), "instrument dump downloaded");

    let upserted = db.upsert_instruments(&rows)?;
    info!(upserted, "instruments table updated");
    Ok(())
}
