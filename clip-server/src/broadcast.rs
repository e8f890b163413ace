//! Event fan-out to registered connections.
//!
//! Fan-out is best-effort and independent per connection: a failed send is
//! logged and counted, never raised, and never blocks delivery to the
//! remaining connections. A connection that keeps failing is left for the
//! liveness sweep to reap.

use crate::registry::{ConnectionRegistry, OutboundFrame};
use crate::server::ServerMetrics;
use clip_types::{ConnectionId, Item, ItemId, Outbound, SyncPayload};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Fans produced events out to all, or all-but-one, registered connections.
#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl BroadcastRouter {
    /// Create a router over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<ServerMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Deliver an event to every registered connection.
    ///
    /// Returns how many connections accepted the frame into their queue.
    pub fn broadcast_to_all(&self, event: Outbound) -> usize {
        self.fan_out(None, event)
    }

    /// Deliver an event to every registered connection except `sender`.
    pub fn broadcast_to_all_except(&self, sender: &ConnectionId, event: Outbound) -> usize {
        self.fan_out(Some(*sender), event)
    }

    /// Push a fresh registry snapshot to every connection.
    pub fn broadcast_stats(&self) -> usize {
        let stats = self.registry.snapshot();
        self.broadcast_to_all(Outbound::ConnectionStats { data: stats })
    }

    /// Announce a newly created item to every connection.
    pub fn broadcast_new_item(&self, item: Item) -> usize {
        self.broadcast_to_all(Outbound::Sync {
            data: SyncPayload::Item(Box::new(item)),
        })
    }

    /// Announce a deleted item to every connection.
    pub fn broadcast_delete(&self, id: ItemId) -> usize {
        self.broadcast_to_all(Outbound::Delete { id })
    }

    /// Deliver `event` to each connection in registry iteration order,
    /// capturing per-send failures without propagating them.
    fn fan_out(&self, except: Option<ConnectionId>, event: Outbound) -> usize {
        self.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for id in self.registry.connection_ids() {
            if Some(id) == except {
                continue;
            }
            match self
                .registry
                .try_send(&id, OutboundFrame::Event(event.clone()))
            {
                Ok(()) => delivered += 1,
                Err(failure) => {
                    self.metrics
                        .broadcast_failures_total
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(connection = %id, ?failure, "broadcast send failed");
                }
            }
        }
        delivered
    }
}
