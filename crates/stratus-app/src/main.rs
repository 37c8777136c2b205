//! Stratus service binary - composition root.
//!
//! Ties the crates together into a single executable:
//! 1. Parse CLI args and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the snapshot store and start the expiry worker
//! 4. Serve the query API until interrupted
//! 5. Drain the expiry worker on shutdown

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stratus_api::{create_router, AppState};
use stratus_core::StratusConfig;
use stratus_storage::SnapshotStore;

mod cli;

use cli::CliArgs;

fn main() {
    let args = CliArgs::parse();
    let mut config = StratusConfig::load_or_default(&args.resolve_config_path());

    if let Some(db) = &args.db {
        config.database.path = db.clone();
    }
    config.server.listen = args.resolve_listen(&config.server.listen);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone())),
        )
        .init();

    if let Err(e) = run(config) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run(config: StratusConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = SnapshotStore::open(&config)?;
    let state = AppState::new(store.repository());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, db = %config.database.path, "query API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The server (and its repository clones) are gone; closing the store
    // drains the expiry worker. Detached sweeps finish on their own.
    info!("shutting down");
    store.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => error!("failed to listen for shutdown signal: {}", e),
    }
}
