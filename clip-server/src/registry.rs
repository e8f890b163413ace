//! Live connection registry.
//!
//! Owns the set of subscriber connections. Each entry holds the optional
//! client-supplied device identity, a liveness timestamp, and the sending
//! half of a bounded per-connection outbound queue. Nothing outside this
//! module touches raw connection handles; the transport layer drains the
//! queue, everything else goes through [`ConnectionRegistry`].

use clip_types::{ConnectionId, ConnectionInfo, ConnectionStats, DeviceId, Outbound};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// A frame queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// A protocol event, encoded to JSON by the transport.
    Event(Outbound),
    /// A transport-level liveness probe (WebSocket ping).
    Probe,
    /// Ask the transport to close the connection.
    Close,
}

/// Why a queued send did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// No such connection (already removed).
    Missing,
    /// The bounded queue is full; the connection is slow or stuck.
    QueueFull,
    /// The transport side dropped its receiver.
    Closed,
}

struct ConnectionEntry {
    device_id: Option<DeviceId>,
    sender: mpsc::Sender<OutboundFrame>,
    last_seen_ms: AtomicI64,
}

/// Concurrency-safe registry of live connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
    admitted_total: AtomicU64,
    queue_capacity: usize,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("active", &self.connections.len())
            .field("admitted_total", &self.admitted_total)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create a registry whose per-connection queues hold `queue_capacity`
    /// frames.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            admitted_total: AtomicU64::new(0),
            queue_capacity,
        }
    }

    /// Admit a connection, returning its id and the receiving half of its
    /// outbound queue for the transport to drain.
    pub fn admit(
        &self,
        device_id: Option<DeviceId>,
    ) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.connections.insert(
            id,
            Arc::new(ConnectionEntry {
                device_id: device_id.clone(),
                sender: tx,
                last_seen_ms: AtomicI64::new(now_millis()),
            }),
        );
        self.admitted_total.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection = %id,
            device = device_id.as_ref().map(|d| d.as_str()).unwrap_or("<anonymous>"),
            active = self.connections.len(),
            "connection admitted"
        );

        (id, rx)
    }

    /// Record liveness for a connection.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(entry) = self.connections.get(id) {
            entry.last_seen_ms.store(now_millis(), Ordering::Relaxed);
        }
    }

    /// Remove a connection. Returns whether it was present.
    ///
    /// Dropping the entry drops the queue sender, which ends the
    /// transport's writer task and closes the socket.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            tracing::debug!(connection = %id, active = self.connections.len(), "connection removed");
        }
        removed
    }

    /// Queue a frame for one connection without blocking.
    pub fn try_send(&self, id: &ConnectionId, frame: OutboundFrame) -> Result<(), SendFailure> {
        let entry = match self.connections.get(id) {
            Some(e) => e.value().clone(),
            None => return Err(SendFailure::Missing),
        };

        entry.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Ids of every live connection, in registry iteration order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Ids of connections silent for longer than `timeout`.
    pub fn stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let cutoff = now_millis() - timeout.as_millis() as i64;
        self.connections
            .iter()
            .filter(|e| e.value().last_seen_ms.load(Ordering::Relaxed) < cutoff)
            .map(|e| *e.key())
            .collect()
    }

    /// Current number of live connections.
    pub fn active(&self) -> usize {
        self.connections.len()
    }

    /// Membership snapshot for observability and stats broadcasts.
    pub fn snapshot(&self) -> ConnectionStats {
        let connections = self
            .connections
            .iter()
            .map(|e| ConnectionInfo {
                connection_id: *e.key(),
                device_id: e.value().device_id.clone(),
            })
            .collect();

        ConnectionStats {
            active_connections: self.connections.len(),
            total_connections: self.admitted_total.load(Ordering::Relaxed),
            connections,
        }
    }

    /// Backdate a connection's liveness timestamp (test hook for the sweep).
    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, id: &ConnectionId, ts_millis: i64) {
        if let Some(entry) = self.connections.get(id) {
            entry.last_seen_ms.store(ts_millis, Ordering::Relaxed);
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
