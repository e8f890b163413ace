//! clipsync-server binary entry point.
//!
//! Usage:
//! ```bash
//! clipsync-server --config clipsync.toml
//! ```

use clipsync_server::broadcast::BroadcastRouter;
use clipsync_server::config::Config;
use clipsync_server::http;
use clipsync_server::reconcile::{spawn_reconcile_task, FileLifecycleCoordinator};
use clipsync_server::retention::{spawn_retention_task, RetentionEngine};
use clipsync_server::server::SyncServer;
use clipsync_server::storage::{FsBlobStore, SqliteItemStore};
use clipsync_server::sweep::spawn_sweep_task;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> clipsync_server::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    http::health::init_start_time();

    let config_path = config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::info!(path = %config_path.display(), "no config file, using defaults");
        Config::default()
    };

    let items = Arc::new(SqliteItemStore::new(&config.storage.database).await?);
    let blobs = Arc::new(FsBlobStore::new(&config.storage.upload_dir).await?);
    let server = Arc::new(SyncServer::new(
        config.clone(),
        items.clone(),
        blobs.clone(),
    ));

    let router = server.router().clone();
    spawn_sweep_task(
        server.registry().clone(),
        router.clone(),
        server.metrics().clone(),
        config.liveness.clone(),
    );

    let engine = Arc::new(RetentionEngine::new(
        items.clone(),
        blobs.clone(),
        router,
        server.metrics().clone(),
    ));
    spawn_retention_task(engine, config.retention.clone());

    let coordinator = Arc::new(FileLifecycleCoordinator::new(items, blobs));
    spawn_reconcile_task(coordinator, config.reconcile.clone());

    let app = http::build_router(server);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        addr = %config.server.bind_address,
        version = env!("CARGO_PKG_VERSION"),
        "clipsync-server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("clipsync.toml"))
}
