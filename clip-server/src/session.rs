//! Per-connection protocol handling.
//!
//! Each connection gets a [`Session`] that decodes inbound frames,
//! dispatches them against the stores and the broadcast router, and queues
//! replies on the sender's outbound queue. Sessions hold no state of their
//! own beyond the connection id; all shared state lives in [`SyncServer`].
//!
//! Malformed input never terminates the connection. Decode failures and
//! storage read failures are answered with a typed `error` event scoped to
//! the originating request; only transport-level failures close the socket.

use crate::registry::OutboundFrame;
use crate::server::SyncServer;
use crate::storage::ItemFilter;
use clip_types::{ConnectionId, Inbound, Item, ItemKind, Outbound, SyncPayload};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A per-connection protocol session.
pub struct Session {
    server: Arc<SyncServer>,
    connection_id: ConnectionId,
}

impl Session {
    /// Create a session for an admitted connection.
    pub fn new(server: Arc<SyncServer>, connection_id: ConnectionId) -> Self {
        Self {
            server,
            connection_id,
        }
    }

    /// The connection this session serves.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Handle one inbound text frame.
    ///
    /// Every frame counts as liveness, including ones that fail to decode.
    pub async fn handle_message(&self, text: &str) {
        self.server.registry().touch(&self.connection_id);
        self.server
            .metrics()
            .messages_total
            .fetch_add(1, Ordering::Relaxed);

        let reply = match Inbound::from_json(text) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                tracing::debug!(connection = %self.connection_id, error = %e, "undecodable frame");
                Some(self.error_event(e.to_string()))
            }
        };

        if let Some(event) = reply {
            self.send_to_self(event);
        }
    }

    /// Dispatch a decoded request. Returns the reply for the sender, if any.
    async fn dispatch(&self, request: Inbound) -> Option<Outbound> {
        match request {
            Inbound::Sync { data: None } => Some(self.handle_full_sync().await),
            Inbound::Sync { data: Some(item) } => self.handle_relay(item),
            Inbound::Delete { id } => {
                self.server
                    .router()
                    .broadcast_to_all_except(&self.connection_id, Outbound::Delete { id });
                None
            }
            Inbound::GetAllText => Some(self.handle_kind_query(ItemKind::Text).await),
            Inbound::GetAllImages => Some(self.handle_kind_query(ItemKind::Image).await),
            Inbound::GetLatest { count } => Some(self.handle_latest(count).await),
            Inbound::GetAllContent { data } => Some(self.handle_content_query(data).await),
            Inbound::Ping => Some(Outbound::Pong),
        }
    }

    /// `sync` without payload: answer with the full current item list.
    async fn handle_full_sync(&self) -> Outbound {
        match self.server.items().query(&ItemFilter::all()).await {
            Ok(items) => Outbound::Sync {
                data: SyncPayload::Items(items),
            },
            Err(e) => self.storage_error(e),
        }
    }

    /// `sync` with payload: relay the item verbatim to every other
    /// connection. The sender gets nothing back on success.
    ///
    /// Only text and image items are relayable. File items travel through
    /// the upload path, which announces them itself.
    fn handle_relay(&self, item: Item) -> Option<Outbound> {
        if item.kind == ItemKind::File {
            return Some(self.error_event("file items cannot be relayed over sync".to_string()));
        }
        if let Err(e) = item.validate() {
            return Some(self.error_event(format!("invalid item payload: {e}")));
        }

        let delivered = self.server.router().broadcast_to_all_except(
            &self.connection_id,
            Outbound::Sync {
                data: SyncPayload::Item(Box::new(item)),
            },
        );
        tracing::debug!(connection = %self.connection_id, delivered, "item relayed");
        None
    }

    /// `get_all_text` / `get_all_images`.
    async fn handle_kind_query(&self, kind: ItemKind) -> Outbound {
        match self.server.items().query(&ItemFilter::of_kind(kind)).await {
            Ok(data) => match kind {
                ItemKind::Text => Outbound::AllText { data },
                _ => Outbound::AllImages { data },
            },
            Err(e) => self.storage_error(e),
        }
    }

    /// `get_latest`: the N most recent items, N defaulted and clamped.
    async fn handle_latest(&self, count: Option<u32>) -> Outbound {
        let limits = &self.server.config().limits;
        let count = count
            .unwrap_or(limits.default_latest_count)
            .min(limits.max_query_limit);

        match self.server.items().query(&ItemFilter::newest(count)).await {
            Ok(data) => Outbound::Latest { data, count },
            Err(e) => self.storage_error(e),
        }
    }

    /// `get_all_content`: paginated/filtered query with a clamped limit and
    /// the total matching count alongside the page.
    async fn handle_content_query(&self, query: clip_types::ContentQuery) -> Outbound {
        let max = self.server.config().limits.max_query_limit;
        let filter = ItemFilter {
            kind: query.kind,
            created_before: None,
            limit: Some(query.limit.unwrap_or(max).min(max)),
            offset: query.offset,
        };

        let page = match self.server.items().query(&filter).await {
            Ok(page) => page,
            Err(e) => return self.storage_error(e),
        };
        let total = match self.server.items().count(query.kind).await {
            Ok(total) => total,
            Err(e) => return self.storage_error(e),
        };

        Outbound::AllContent {
            message: format!("retrieved {} of {} items", page.len(), total),
            data: page,
            count: total,
        }
    }

    /// Queue an event on this session's own outbound queue.
    fn send_to_self(&self, event: Outbound) {
        if let Err(failure) = self
            .server
            .registry()
            .try_send(&self.connection_id, OutboundFrame::Event(event))
        {
            tracing::warn!(connection = %self.connection_id, ?failure, "reply dropped");
        }
    }

    fn error_event(&self, message: String) -> Outbound {
        self.server
            .metrics()
            .errors_total
            .fetch_add(1, Ordering::Relaxed);
        Outbound::Error { message }
    }

    fn storage_error(&self, e: crate::error::StorageError) -> Outbound {
        tracing::error!(connection = %self.connection_id, error = %e, "storage query failed");
        self.error_event("storage unavailable".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::SyncServer;
    use crate::test_support::{image_item, test_server, text_item};
    use clip_types::DeviceId;
    use tokio::sync::mpsc::Receiver;

    struct Peer {
        session: Session,
        rx: Receiver<OutboundFrame>,
    }

    fn connect(server: &Arc<SyncServer>, device: Option<&str>) -> Peer {
        let device_id = device.map(DeviceId::new);
        let (id, rx) = server.registry().admit(device_id);
        Peer {
            session: Session::new(server.clone(), id),
            rx,
        }
    }

    impl Peer {
        async fn recv_event(&mut self) -> Outbound {
            match self.rx.recv().await {
                Some(OutboundFrame::Event(ev)) => ev,
                other => panic!("expected event, got {other:?}"),
            }
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn sync_without_payload_returns_full_list() {
        let (_dir, server) = test_server().await;
        server.items().insert(&text_item("a", 1000)).await.unwrap();
        server.items().insert(&text_item("b", 2000)).await.unwrap();

        let mut peer = connect(&server, None);
        peer.session.handle_message(r#"{"type":"sync"}"#).await;

        match peer.recv_event().await {
            Outbound::Sync {
                data: SyncPayload::Items(items),
            } => {
                assert_eq!(items.len(), 2);
                // Newest first
                assert_eq!(items[0].content, "b");
            }
            other => panic!("expected full list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_sync_matches_direct_store_query() {
        let (_dir, server) = test_server().await;
        for ts in [3000, 1000, 2000] {
            server.items().insert(&text_item("x", ts)).await.unwrap();
        }

        let direct = server.items().query(&ItemFilter::all()).await.unwrap();
        let mut peer = connect(&server, None);
        peer.session.handle_message(r#"{"type":"sync"}"#).await;

        match peer.recv_event().await {
            Outbound::Sync {
                data: SyncPayload::Items(items),
            } => assert_eq!(items, direct),
            other => panic!("expected full list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relayed_item_reaches_everyone_but_the_sender() {
        let (_dir, server) = test_server().await;
        let mut a = connect(&server, None);
        let mut b = connect(&server, Some("d1"));
        let mut c = connect(&server, Some("d1"));

        let item = text_item("copied", 1000);
        let frame = serde_json::to_string(&serde_json::json!({
            "type": "sync",
            "data": item,
        }))
        .unwrap();
        a.session.handle_message(&frame).await;

        for peer in [&mut b, &mut c] {
            match peer.recv_event().await {
                Outbound::Sync {
                    data: SyncPayload::Item(got),
                } => assert_eq!(*got, item),
                other => panic!("expected relayed item, got {other:?}"),
            }
        }
        a.assert_silent();
    }

    #[tokio::test]
    async fn file_items_are_not_relayable() {
        let (_dir, server) = test_server().await;
        let mut a = connect(&server, None);
        let mut b = connect(&server, None);

        let frame = serde_json::to_string(&serde_json::json!({
            "type": "sync",
            "data": crate::test_support::file_item("f.bin", 10, 1000),
        }))
        .unwrap();
        a.session.handle_message(&frame).await;

        assert!(matches!(a.recv_event().await, Outbound::Error { .. }));
        b.assert_silent();
    }

    #[tokio::test]
    async fn invalid_item_payload_is_rejected_not_relayed() {
        let (_dir, server) = test_server().await;
        let mut a = connect(&server, None);
        let mut b = connect(&server, None);

        // Image without a blob reference violates the item invariant
        let mut item = image_item("x.png", 10, 1000);
        item.blob_ref = None;
        let frame = serde_json::to_string(&serde_json::json!({
            "type": "sync",
            "data": item,
        }))
        .unwrap();
        a.session.handle_message(&frame).await;

        assert!(matches!(a.recv_event().await, Outbound::Error { .. }));
        b.assert_silent();
    }

    #[tokio::test]
    async fn delete_notice_fans_out_to_others() {
        let (_dir, server) = test_server().await;
        let mut a = connect(&server, None);
        let mut b = connect(&server, None);

        let item = text_item("x", 1000);
        let frame = serde_json::to_string(&serde_json::json!({
            "type": "delete",
            "id": item.id,
        }))
        .unwrap();
        a.session.handle_message(&frame).await;

        match b.recv_event().await {
            Outbound::Delete { id } => assert_eq!(id, item.id),
            other => panic!("expected delete notice, got {other:?}"),
        }
        a.assert_silent();
    }

    #[tokio::test]
    async fn kind_queries_return_only_their_kind() {
        let (dir, server) = test_server().await;
        crate::test_support::seed_blob(&dir, "p.png");
        server.items().insert(&text_item("t", 1000)).await.unwrap();
        server
            .items()
            .insert(&image_item("p.png", 10, 2000))
            .await
            .unwrap();

        let mut peer = connect(&server, None);

        peer.session.handle_message(r#"{"type":"get_all_text"}"#).await;
        match peer.recv_event().await {
            Outbound::AllText { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].kind, ItemKind::Text);
            }
            other => panic!("expected text list, got {other:?}"),
        }

        peer.session
            .handle_message(r#"{"type":"get_all_images"}"#)
            .await;
        match peer.recv_event().await {
            Outbound::AllImages { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].kind, ItemKind::Image);
            }
            other => panic!("expected image list, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn latest_defaults_and_echoes_count() {
        let (_dir, server) = test_server().await;
        for ts in 1..=15 {
            server.items().insert(&text_item("x", ts * 1000)).await.unwrap();
        }

        let mut peer = connect(&server, None);
        peer.session.handle_message(r#"{"type":"get_latest"}"#).await;

        match peer.recv_event().await {
            Outbound::Latest { data, count } => {
                // Default count from configuration
                assert_eq!(count, 10);
                assert_eq!(data.len(), 10);
                assert_eq!(data[0].created_at, 15_000);
            }
            other => panic!("expected latest, got {other:?}"),
        }

        peer.session
            .handle_message(r#"{"type":"get_latest","count":3}"#)
            .await;
        match peer.recv_event().await {
            Outbound::Latest { data, count } => {
                assert_eq!(count, 3);
                assert_eq!(data.len(), 3);
            }
            other => panic!("expected latest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_query_clamps_limit_and_reports_total() {
        let (_dir, server) = test_server().await;
        for ts in 1..=4 {
            server.items().insert(&text_item("x", ts * 1000)).await.unwrap();
        }

        let mut peer = connect(&server, None);
        peer.session
            .handle_message(r#"{"type":"get_all_content","data":{"limit":2,"offset":1}}"#)
            .await;

        match peer.recv_event().await {
            Outbound::AllContent {
                data,
                message,
                count,
            } => {
                assert_eq!(data.len(), 2);
                // Offset 1 into newest-first skips the newest
                assert_eq!(data[0].created_at, 3000);
                assert_eq!(count, 4);
                assert_eq!(message, "retrieved 2 of 4 items");
            }
            other => panic!("expected content page, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_query_limit_never_exceeds_the_ceiling() {
        let (_dir, server) = test_server().await;
        let mut peer = connect(&server, None);

        // A limit over the ceiling decodes fine; the server clamps it
        peer.session
            .handle_message(r#"{"type":"get_all_content","data":{"limit":999999}}"#)
            .await;

        assert!(matches!(
            peer.recv_event().await,
            Outbound::AllContent { .. }
        ));
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let (_dir, server) = test_server().await;
        let mut peer = connect(&server, None);

        peer.session.handle_message(r#"{"type":"ping"}"#).await;
        assert_eq!(peer.recv_event().await, Outbound::Pong);
    }

    #[tokio::test]
    async fn malformed_input_answers_error_and_keeps_the_connection() {
        let (_dir, server) = test_server().await;
        let mut peer = connect(&server, None);

        for bad in ["{nope", r#"{"data":1}"#, r#"{"type":"subscribe"}"#] {
            peer.session.handle_message(bad).await;
            assert!(matches!(peer.recv_event().await, Outbound::Error { .. }));
        }

        // The connection is still registered and fully functional
        assert_eq!(server.registry().active(), 1);
        peer.session.handle_message(r#"{"type":"ping"}"#).await;
        assert_eq!(peer.recv_event().await, Outbound::Pong);
    }

    #[tokio::test]
    async fn every_frame_counts_as_liveness() {
        let (_dir, server) = test_server().await;
        let mut peer = connect(&server, None);
        let id = *peer.session.connection_id();

        server
            .registry()
            .set_last_seen(&id, crate::registry::now_millis() - 61_000);
        assert_eq!(
            server
                .registry()
                .stale(std::time::Duration::from_secs(60))
                .len(),
            1
        );

        // Even a malformed frame refreshes liveness
        peer.session.handle_message("{nope").await;
        assert!(server
            .registry()
            .stale(std::time::Duration::from_secs(60))
            .is_empty());
        let _ = peer.recv_event().await;
    }
}
