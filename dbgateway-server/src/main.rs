use std::time::Duration;

use anyhow::Context;
use dbgateway_pool::PoolManager;
use tokio::net::TcpListener;

use dbgateway_server::config::AppConfig;
use dbgateway_server::state::{build_registry, AppState};
use dbgateway_server::{http, logging};

/// Grace window for in-flight connections during shutdown (§5 "Active
/// connections are allowed to finish briefly before being forcibly closed").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("DBGATEWAY_CONFIG").unwrap_or_else(|_| "dbgateway.json".to_owned());
    let mut config = AppConfig::load(&config_path).with_context(|| format!("failed to load {config_path}"))?;
    config.validate().context("invalid configuration")?;

    logging::init(config.application.log_level);
    tracing::info!(name = %config.application.name, version = %config.application.version, "starting");

    PoolManager::init(build_registry());
    let manager = PoolManager::instance().expect("just initialized");
    manager.configure_pools(config.database_pools).await.context("failed to configure database pools")?;

    let state = AppState::new(manager, config.security.jwt);
    let app = http::router(state);

    let listener = TcpListener::bind("0.0.0.0:8080").await.context("failed to bind 0.0.0.0:8080")?;
    tracing::info!(addr = "0.0.0.0:8080", "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    PoolManager::shutdown_all(Some(SHUTDOWN_GRACE)).await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
