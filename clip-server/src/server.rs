//! Central server assembly.
//!
//! [`SyncServer`] wires the configuration, stores, connection registry, and
//! broadcast router together and carries the operational metrics.

use crate::broadcast::BroadcastRouter;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::storage::{BlobStore, ItemStore};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring server activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total connections admitted.
    pub connections_total: AtomicU64,
    /// Total inbound protocol messages handled.
    pub messages_total: AtomicU64,
    /// Total fan-out operations.
    pub broadcasts_total: AtomicU64,
    /// Total individual broadcast sends that failed.
    pub broadcast_failures_total: AtomicU64,
    /// Total item rows deleted by retention.
    pub rows_evicted_total: AtomicU64,
    /// Total blobs deleted by retention.
    pub blobs_evicted_total: AtomicU64,
    /// Total connections reaped by the liveness sweep.
    pub sweep_reaped_total: AtomicU64,
    /// Total protocol errors answered with an error event.
    pub errors_total: AtomicU64,
}

/// Main server object shared by the transport, sweep, and retention tasks.
pub struct SyncServer {
    config: Config,
    items: Arc<dyn ItemStore>,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SyncServer {
    /// Assemble a server from configuration and storage backends.
    pub fn new(config: Config, items: Arc<dyn ItemStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.limits.queue_capacity));
        let metrics = Arc::new(ServerMetrics::default());
        let router = BroadcastRouter::new(registry.clone(), metrics.clone());

        Self {
            config,
            items,
            blobs,
            registry,
            router,
            metrics,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The item store.
    pub fn items(&self) -> &Arc<dyn ItemStore> {
        &self.items
    }

    /// The blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The broadcast router.
    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// Operational metrics.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }
}
