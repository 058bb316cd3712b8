//! Relay Webhook - Main entry point.

use anyhow::{Context, Result};
use relay_common::config::Config;
use relay_common::logging::init_logging;
use relay_webhook::start_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Relay Webhook v{}", env!("CARGO_PKG_VERSION"));

    // Missing credentials are a deployment error
    config.validate().context("Invalid configuration")?;

    start_server(&config).await
}
