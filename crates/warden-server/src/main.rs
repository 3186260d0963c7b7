//! WARDEN Server — Application entry point.
//!
//! Connects to SurrealDB, runs migrations, wires the engine together
//! (event bus, invalidation controller, expiry sweeper) and runs until
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use warden_db::repository::{
    SurrealGrantRepository, SurrealGroupRepository, SurrealNodeRepository,
};
use warden_db::{DbConfig, DbManager};
use warden_engine::invalidate::{EventBus, ExpirySweeper, InvalidationController, MemoryViewCache};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("warden=info".parse().unwrap()),
        )
        .json()
        .init();

    tracing::info!("Starting WARDEN server...");

    let config = DbConfig::from_env();
    let manager = match DbManager::connect(&config).await {
        Ok(manager) => manager,
        Err(error) => {
            tracing::error!(%error, "failed to connect to SurrealDB");
            std::process::exit(1);
        }
    };
    if let Err(error) = warden_db::run_migrations(manager.db()).await {
        tracing::error!(%error, "migrations failed");
        std::process::exit(1);
    }

    let db = manager.db().clone();
    let cache = Arc::new(MemoryViewCache::new());

    let (bus, receiver) = EventBus::channel();
    let controller = Arc::new(InvalidationController::new(
        SurrealGrantRepository::new(db.clone()),
        SurrealGroupRepository::new(db.clone()),
        SurrealNodeRepository::new(db.clone()),
        cache.clone(),
    ));
    let controller_handle = controller.start(receiver);

    let sweeper = Arc::new(ExpirySweeper::new(
        SurrealGrantRepository::new(db.clone()),
        SurrealGroupRepository::new(db),
        cache,
    ));
    let sweeper_handle = sweeper.run(EXPIRY_SWEEP_INTERVAL);

    tracing::info!("WARDEN server ready");

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down");
    sweeper_handle.abort();
    bus.shutdown();
    if let Err(error) = controller_handle.await {
        if !error.is_cancelled() {
            tracing::warn!(%error, "invalidation controller ended abnormally");
        }
    }

    tracing::info!("WARDEN server stopped.");
}
