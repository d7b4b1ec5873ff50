//! Order engine - main entry point
//!
//! This binary provides three subcommands:
//! - run: Run the engine (paper or live)
//! - sync-instruments: Download and store the exchange instrument dump
//! - init-db: Create the database schema

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "order-engine")]
#[command(about = "Conditional order management and execution engine for NSE equities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,

        /// Paper trading mode (simulated feed, no real orders)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL ORDERS!)
        #[arg(long)]
        live: bool,

        /// JSON file of order requests to admit on startup
        #[arg(long)]
        orders: Option<String>,
    },

    /// Download the exchange instrument dump into the database
    SyncInstruments {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,

        /// Exchange to download (defaults to the configured one)
        #[arg(short, long)]
        exchange: Option<String>,
    },

    /// Create the database schema
    InitDb {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates unless explicitly requested
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::SyncInstruments { .. } => "sync",
        Commands::InitDb { .. } => "init-db",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            config,
            paper,
            live,
            orders,
        } => commands::run::run(config, paper, live, orders),

        Commands::SyncInstruments { config, exchange } => commands::sync::run(config, exchange),

        Commands::InitDb { config } => commands::init_db::run(config),
    }
}
