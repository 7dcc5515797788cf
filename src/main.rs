use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

mod config;
mod connectors;
mod dashboard;
mod db;
mod engine;
mod normalize;
mod paper;
mod scheduler;

use config::Config;
use dashboard::AppState;
use db::Database;
use scheduler::hub::SignalHub;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let database = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);
    info!(
        "Market data source: {} (configured: {})",
        config.active_market_data_source(),
        config.market_data_source
    );
    if config.enable_demo_fallback {
        info!("Demo fallback enabled; built-in markets substitute when discovery is empty");
    }

    // Scheduler loops share one stop signal, flipped on ctrl-c.
    let hub = Arc::new(SignalHub::new());
    let scheduler = Arc::new(Scheduler::new(config.clone(), database.clone(), hub.clone())?);
    let (stop_tx, stop_rx) = watch::channel(false);
    let tasks = Arc::clone(&scheduler).start(stop_rx);

    // Dashboard HTTP server
    let state = AppState {
        db: database,
        scheduler,
        hub,
        exclude_demo: !config.enable_demo_fallback,
    };
    let app = dashboard::router(state);
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(stop_tx))
        .await?;

    // Give the loops a moment to notice the stop signal and finish their
    // current cycle.
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(stop_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received; stopping loops");
    let _ = stop_tx.send(true);
}
