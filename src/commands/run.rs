//! Run Command
//!
//! Starts the engine against either the real broker (live mode) or the
//! simulated feed and paper broker (paper mode), optionally seeds orders
//! from a JSON file, and keeps running until Ctrl+C or an engine-initiated
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use order_engine::kite::{
    ClientConfig, Credentials, KiteClient, MarketFeed, PaperBroker, PollingFeed, SimFeed,
};
use order_engine::{Config, Database, OrderEngine, OrderRequest};

pub fn run(config_path: String, paper: bool, live: bool, orders_path: Option<String>) -> Result<()> {
    if !paper && !live {
        bail!("Must specify either --paper or --live mode");
    }
    if paper && live {
        bail!("Cannot specify both --paper and --live modes");
    }

    dotenv::dotenv().ok();

    let config = load_config(&config_path)?;
    let db = Database::new(&config.database.path);

    let (feed, broker): (Arc<dyn MarketFeed>, Arc<dyn order_engine::kite::BrokerClient>) = if paper
    {
        info!("paper mode: simulated feed and paper broker");
        let feed = SimFeed::random_walk(100.0, Duration::from_millis(config.broker.poll_interval_ms));
        (Arc::new(feed), Arc::new(PaperBroker::new()))
    } else {
        warn!("LIVE trading mode: orders will reach the exchange");
        let api_key = config
            .broker
            .api_key
            .clone()
            .context("live mode requires broker.api_key or KITE_API_KEY")?;
        let access_token = config
            .broker
            .access_token
            .clone()
            .context("live mode requires broker.access_token or KITE_ACCESS_TOKEN")?;

        let client_config = ClientConfig::default()
            .with_timeout(Duration::from_secs(config.broker.timeout_secs))
            .with_rate_limit(config.broker.rate_limit as usize);
        let client = Arc::new(KiteClient::with_config(
            Credentials::new(api_key, access_token),
            client_config,
        ));
        let feed = PollingFeed::new(
            client.clone(),
            db.clone(),
            config.broker.exchange.clone(),
            Duration::from_millis(config.broker.poll_interval_ms),
            config.broker.max_reconnect_attempts,
        );
        (Arc::new(feed), client)
    };

    let mut engine = OrderEngine::new(&config, feed, broker)?;
    engine.start()?;

    if let Some(path) = orders_path {
        seed_orders(&engine, &path)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("received Ctrl+C, shutting down"),
                        Err(e) => error!(error = %e, "signal handler error; shutting down"),
                    }
                    break;
                }
                _ = heartbeat.tick() => {
                    if !engine.is_running() {
                        warn!("engine stopped on its own");
                        break;
                    }
                }
            }
        }
    });

    engine.stop();
    info!("run finished");
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        info!(path, "config file not found, using defaults");
        let mut config = Config::default();
        config.merge_env();
        Ok(config)
    }
}

/// Admit a JSON array of order requests on startup
fn seed_orders(engine: &OrderEngine, path: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read orders file {path}"))?;
    let requests: Vec<OrderRequest> =
        serde_json::from_str(&contents).context("Failed to parse orders JSON")?;

    info!(count = requests.len(), "seeding orders from file");
    for request in requests {
        let order_id = request.order_id;
        if let Err(e) = engine.add_order(request) {
            error!(order_id, error = %e, "seeded order rejected");
        }
    }
    Ok(())
}
