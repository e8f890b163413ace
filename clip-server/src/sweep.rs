//! Liveness sweep.
//!
//! Runs on a fixed period. Connections silent past the timeout are force-
//! closed and removed; everyone else gets a transport-level probe. A
//! connection that never answers a probe goes stale and is reaped on a
//! later cycle, so detection latency is roughly one timeout window.

use crate::broadcast::BroadcastRouter;
use crate::config::LivenessConfig;
use crate::registry::{ConnectionRegistry, OutboundFrame};
use crate::server::ServerMetrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// One sweep cycle: reap stale connections, then probe the rest.
///
/// Returns how many connections were reaped. Removals are announced with a
/// stats broadcast so remaining subscribers see the membership change.
pub async fn sweep_once(
    registry: &ConnectionRegistry,
    router: &BroadcastRouter,
    metrics: &ServerMetrics,
    timeout: Duration,
) -> usize {
    let stale = registry.stale(timeout);

    for id in &stale {
        tracing::info!(connection = %id, "closing silent connection");
        // Ask the transport to close; if the queue is already gone the
        // removal below tears the connection down anyway.
        let _ = registry.try_send(id, OutboundFrame::Close);
        registry.remove(id);
    }

    if !stale.is_empty() {
        metrics
            .sweep_reaped_total
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        router.broadcast_stats();
    }

    for id in registry.connection_ids() {
        if let Err(failure) = registry.try_send(&id, OutboundFrame::Probe) {
            // Leave it for the next cycle; an unreachable connection stops
            // refreshing its timestamp and ages out.
            tracing::debug!(connection = %id, ?failure, "probe not queued");
        }
    }

    stale.len()
}

/// Spawn the periodic liveness sweep task.
pub fn spawn_sweep_task(
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
    metrics: Arc<ServerMetrics>,
    config: LivenessConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            probe_interval_secs = config.probe_interval_secs,
            timeout_secs = config.timeout_secs,
            "liveness sweep started"
        );
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut timer = interval(Duration::from_secs(config.probe_interval_secs));

        loop {
            timer.tick().await;

            let reaped = sweep_once(&registry, &router, &metrics, timeout).await;
            if reaped > 0 {
                tracing::info!(reaped, "sweep removed silent connections");
            }
        }
    })
}
