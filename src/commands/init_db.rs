//! Init DB Command
//!
//! Creates the order, execution, and instrument tables if they are missing.
//! The engine also does this on construction; the command exists so
//! deployments can prepare the database ahead of first start.

use anyhow::Result;
use tracing::info;

use order_engine::{Config, Database};

pub fn run(config_path: String) -> Result<()> {
    let config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    let db = Database::new(&config.database.path);
    db.init_schema()?;
    info!(path = %config.database.path, "database initialized");
    Ok(())
}
