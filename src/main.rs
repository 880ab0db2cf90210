//! convert-relay server binary
//!
//! Reads configuration from the environment (and an optional `.env` file or
//! `RELAY_CONFIG` JSON file), then serves until SIGTERM/SIGINT.

use convert_relay::{Config, serve_with_shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        bind = %config.api.bind_address,
        temp_dir = %config.storage.temp_dir.display(),
        "starting convert-relay"
    );

    serve_with_shutdown(config).await?;

    tracing::info!("convert-relay stopped");
    Ok(())
}
