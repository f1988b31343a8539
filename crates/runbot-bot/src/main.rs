//! runbot - Entry Point
//!
//! Logs in, runs the configured strategy until it stops or a shutdown
//! signal arrives, then waits for the open contract to close.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// runbot contract purchase bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via RUNBOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    runbot_ws::init_crypto();

    let args = Args::parse();

    runbot_telemetry::init_logging()?;

    info!("Starting runbot v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > RUNBOT_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("RUNBOT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = runbot_bot::AppConfig::from_file(&config_path)?;
    info!(ws_url = %config.ws_url, symbol = %config.trade.symbol, "Configuration loaded");

    let app = runbot_bot::Application::new(config)?;
    let summary = app.run().await?;

    info!(
        run_id = %summary.run_id,
        contracts = summary.contracts,
        session_profit = %summary.session_profit,
        "runbot stopped"
    );
    Ok(())
}
