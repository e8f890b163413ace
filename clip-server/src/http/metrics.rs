//! Prometheus metrics endpoint.

use crate::server::SyncServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(server): Extension<Arc<SyncServer>>) -> impl IntoResponse {
    let m = server.metrics();

    // Gauges — current state
    let connections = server.registry().active();

    // Counters — monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let messages = m.messages_total.load(Ordering::Relaxed);
    let broadcasts = m.broadcasts_total.load(Ordering::Relaxed);
    let broadcast_failures = m.broadcast_failures_total.load(Ordering::Relaxed);
    let rows_evicted = m.rows_evicted_total.load(Ordering::Relaxed);
    let blobs_evicted = m.blobs_evicted_total.load(Ordering::Relaxed);
    let sweep_reaped = m.sweep_reaped_total.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Storage stats (async queries — best effort)
    let items = server.items().count(None).await.unwrap_or(0);

    let body = format!(
        r#"# HELP clipsync_connections_active Number of live connections
# TYPE clipsync_connections_active gauge
clipsync_connections_active {connections}

# HELP clipsync_info Server information
# TYPE clipsync_info gauge
clipsync_info{{version="{version}"}} 1

# HELP clipsync_connections_total Total connections admitted
# TYPE clipsync_connections_total counter
clipsync_connections_total {conns_total}

# HELP clipsync_messages_total Total inbound protocol messages handled
# TYPE clipsync_messages_total counter
clipsync_messages_total {messages}

# HELP clipsync_broadcasts_total Total fan-out operations
# TYPE clipsync_broadcasts_total counter
clipsync_broadcasts_total {broadcasts}

# HELP clipsync_broadcast_failures_total Total individual broadcast sends that failed
# TYPE clipsync_broadcast_failures_total counter
clipsync_broadcast_failures_total {broadcast_failures}

# HELP clipsync_rows_evicted_total Total item rows deleted by retention
# TYPE clipsync_rows_evicted_total counter
clipsync_rows_evicted_total {rows_evicted}

# HELP clipsync_blobs_evicted_total Total blobs deleted by retention
# TYPE clipsync_blobs_evicted_total counter
clipsync_blobs_evicted_total {blobs_evicted}

# HELP clipsync_sweep_reaped_total Total connections reaped by the liveness sweep
# TYPE clipsync_sweep_reaped_total counter
clipsync_sweep_reaped_total {sweep_reaped}

# HELP clipsync_errors_total Total requests answered with an error event
# TYPE clipsync_errors_total counter
clipsync_errors_total {errors}

# HELP clipsync_items Number of items currently stored
# TYPE clipsync_items gauge
clipsync_items {items}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
