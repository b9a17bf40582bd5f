//! weatherwatch: temporal weather snapshot service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the snapshot store, starts scheduled ingestion and the HTTP API,
//! and shuts everything down in order on Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use weatherwatch::api::{self, ApiState, ServerHandle};
use weatherwatch::config::AppConfig;
use weatherwatch::data::openweather::OpenWeatherClient;
use weatherwatch::engine::Core;
use weatherwatch::storage::SnapshotStore;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("WEATHERWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        service = %cfg.service.name,
        config = %config_path,
        locations = cfg.locations.len(),
        current_interval_secs = cfg.ingest.current_interval_secs,
        forecast_interval_secs = cfg.ingest.forecast_interval_secs,
        "weatherwatch starting up"
    );

    // -- Store -----------------------------------------------------------

    let store = SnapshotStore::connect(&cfg.database)
        .await
        .with_context(|| format!("Failed to open snapshot store at {}", cfg.database.url))?;
    let seeded = store
        .seed_locations(&cfg.locations)
        .await
        .context("Failed to seed location registry")?;
    info!(seeded, total = cfg.locations.len(), "Location registry ready");

    // -- Provider & core -------------------------------------------------

    let provider = OpenWeatherClient::new(
        cfg.provider_api_key()?,
        cfg.provider.base_url.clone(),
        Duration::from_secs(cfg.provider.timeout_secs),
    )
    .context("Failed to build OpenWeather client")?;

    let mut core = Core::new(&cfg, store, Arc::new(provider));
    core.start_scheduler(&cfg);

    // -- HTTP ------------------------------------------------------------

    let server = if cfg.server.enabled {
        let state = Arc::new(ApiState::from_core(&core, cfg.service.name.clone()));
        Some(ServerHandle::spawn(state, cfg.server.port))
    } else {
        info!("HTTP server disabled");
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    api::run_until(core, server, shutdown_signal()).await;

    info!("weatherwatch shut down cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("weatherwatch=info,tower_http=info"));

    let json_logging = std::env::var("WEATHERWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
