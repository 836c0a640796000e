//! Sensor stream monitor - Entry Point

use anyhow::Result;
use clap::Parser;
use sensor_monitor::config::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use tracing::info;

/// Sensor stream monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SENSOR_MONITOR_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any wss:// connections)
    sensor_ws::init_crypto();

    let args = Args::parse();

    sensor_telemetry::init_logging()?;

    info!("Starting sensor monitor v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = sensor_monitor::AppConfig::from_file(&config_path)?;
    info!(
        url = %config.connection.url,
        api = %config.api.base_url,
        sensors = config.sensors.len(),
        "Configuration loaded"
    );

    let app = sensor_monitor::Application::new(config)?;
    app.run_health_check().await;
    app.run().await?;

    Ok(())
}
