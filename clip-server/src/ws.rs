//! WebSocket transport.
//!
//! Clients connect at `/ws?deviceId=...` (the parameter is optional). Each
//! accepted socket is split: a reader task feeds inbound text frames to the
//! session handler, and a writer task drains the connection's outbound
//! queue. The registry never sees socket handles; the queue is the only
//! seam between the transport and the rest of the server.
//!
//! Teardown is driven from either side: a closed socket ends the reader,
//! and removing the connection from the registry drops the queue sender,
//! which ends the writer. Whichever finishes first cancels the other, so a
//! reaped connection never leaves a reader parked on a dead peer. A writer
//! stuck mid-send (dead peer, full kernel buffer) is bounded by the
//! configured write timeout.

use crate::registry::OutboundFrame;
use crate::server::SyncServer;
use crate::session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Query;
use axum::response::IntoResponse;
use axum::Extension;
use clip_types::DeviceId;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    /// Optional client-supplied device identity.
    pub device_id: Option<String>,
}

/// `/ws` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    Extension(server): Extension<Arc<SyncServer>>,
) -> impl IntoResponse {
    let device_id = params.device_id.filter(|d| !d.is_empty()).map(DeviceId::new);
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        run_connection(server, sink, stream, device_id).await;
    })
}

/// Drive one connection from admission to teardown.
///
/// Generic over the socket halves so tests can drive a connection without
/// a live WebSocket. Returns once both halves are finished; the socket is
/// dropped (and the fd closed) when this returns.
async fn run_connection<W, R, E>(
    server: Arc<SyncServer>,
    sink: W,
    stream: R,
    device_id: Option<DeviceId>,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (connection_id, outbound) = server.registry().admit(device_id);
    server
        .metrics()
        .connections_total
        .fetch_add(1, Ordering::Relaxed);
    server.router().broadcast_stats();

    let write_timeout = Duration::from_secs(server.config().limits.write_timeout_secs);
    let mut writer = tokio::spawn(write_loop(sink, outbound, write_timeout));
    let session = Session::new(server.clone(), connection_id);

    // The writer finishing means the registry entry is gone (sweep reap),
    // a close frame went out, or the peer stopped accepting writes; either
    // way the reader must not keep waiting on a peer that will never speak
    // again.
    tokio::select! {
        _ = read_loop(&server, &session, stream) => {}
        _ = &mut writer => {}
    }

    server.registry().remove(&connection_id);
    writer.abort();
    server.router().broadcast_stats();
    tracing::debug!(connection = %connection_id, "connection torn down");
}

/// Feed inbound frames to the session until the socket closes.
async fn read_loop<R, E>(server: &Arc<SyncServer>, session: &Session, mut stream: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_message(&text).await,
            // Control frames count as liveness but carry no request
            Ok(Message::Pong(_)) | Ok(Message::Ping(_)) => {
                server.registry().touch(session.connection_id());
            }
            Ok(Message::Binary(_)) => {
                // The protocol is text-only; answer like any undecodable
                // frame and keep the connection open.
                session.handle_message("").await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(connection = %session.connection_id(), error = %e, "socket read failed");
                break;
            }
        }
    }
}

/// Drain the outbound queue into the socket.
///
/// Ends when the queue sender is dropped (registry removal), a close frame
/// goes out, a send fails, or a send exceeds `write_timeout`.
async fn write_loop<W>(mut sink: W, mut outbound: mpsc::Receiver<OutboundFrame>, write_timeout: Duration)
where
    W: Sink<Message> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let close_after = matches!(frame, OutboundFrame::Close);
        let msg = match encode_frame(frame) {
            Some(msg) => msg,
            None => continue,
        };
        match tokio::time::timeout(write_timeout, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::debug!("socket write timed out");
                break;
            }
        }
        if close_after {
            break;
        }
    }
}

/// Map a queued frame to a WebSocket message.
///
/// Returns `None` when an event fails to encode; the frame is dropped
/// rather than poisoning the connection.
fn encode_frame(frame: OutboundFrame) -> Option<Message> {
    match frame {
        OutboundFrame::Event(event) => match event.to_json() {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                tracing::error!(error = %e, "outbound event failed to encode");
                None
            }
        },
        OutboundFrame::Probe => Some(Message::Ping(Vec::new())),
        OutboundFrame::Close => Some(Message::Close(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::now_millis;
    use crate::sweep::sweep_once;
    use crate::test_support::test_server;
    use clip_types::Outbound;
    use futures_util::{sink, stream};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::time::{sleep, timeout};

    #[test]
    fn query_accepts_optional_device_id() {
        let q: WsQuery = serde_json::from_str(r#"{"deviceId":"laptop-1"}"#).unwrap();
        assert_eq!(q.device_id.as_deref(), Some("laptop-1"));

        let q: WsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.device_id, None);
    }

    #[test]
    fn events_encode_to_text_frames() {
        let msg = encode_frame(OutboundFrame::Event(Outbound::Pong)).unwrap();
        assert_eq!(msg, Message::Text(r#"{"type":"pong"}"#.to_string()));
    }

    #[test]
    fn probes_map_to_protocol_pings() {
        assert!(matches!(
            encode_frame(OutboundFrame::Probe),
            Some(Message::Ping(_))
        ));
        assert!(matches!(
            encode_frame(OutboundFrame::Close),
            Some(Message::Close(None))
        ));
    }

    async fn wait_for_admission(server: &Arc<SyncServer>) {
        for _ in 0..100 {
            if server.registry().active() == 1 {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("connection was never admitted");
    }

    #[tokio::test]
    async fn reaped_connection_tears_down_without_peer_frames() {
        let (_dir, server) = test_server().await;

        // A peer that never sends another frame, like a dead TCP endpoint
        let silent = stream::pending::<Result<Message, axum::Error>>();
        let conn = tokio::spawn(run_connection(server.clone(), sink::drain(), silent, None));

        wait_for_admission(&server).await;
        let id = server.registry().connection_ids()[0];
        server.registry().set_last_seen(&id, now_millis() - 61_000);

        sweep_once(
            server.registry(),
            server.router(),
            server.metrics(),
            Duration::from_secs(60),
        )
        .await;

        // The whole connection driver finishes even though the reader
        // never saw a frame
        timeout(Duration::from_secs(1), conn)
            .await
            .expect("reaped connection leaked its reader")
            .expect("connection driver panicked");
        assert_eq!(server.registry().active(), 0);
    }

    #[tokio::test]
    async fn client_close_frame_removes_the_connection() {
        let (_dir, server) = test_server().await;

        let frames = stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);
        let conn = tokio::spawn(run_connection(server.clone(), sink::drain(), frames, None));

        timeout(Duration::from_secs(1), conn)
            .await
            .expect("close frame did not end the connection")
            .expect("connection driver panicked");
        assert_eq!(server.registry().active(), 0);
    }

    /// A sink that is never ready, like a peer whose receive window is
    /// permanently full.
    struct StuckSink;

    impl Sink<Message> for StuckSink {
        type Error = std::convert::Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn stuck_writer_does_not_block_the_reap() {
        let mut config = crate::config::Config::default();
        config.limits.queue_capacity = 1;
        config.limits.write_timeout_secs = 1;
        let (_dir, server) = crate::test_support::test_server_with(config).await;

        let silent = stream::pending::<Result<Message, axum::Error>>();
        let conn = tokio::spawn(run_connection(server.clone(), StuckSink, silent, None));

        wait_for_admission(&server).await;
        let id = server.registry().connection_ids()[0];

        // Park the writer mid-send and back the queue up so the sweep's
        // close frame cannot even be queued
        while server
            .registry()
            .try_send(&id, OutboundFrame::Event(Outbound::Pong))
            .is_ok()
        {}

        server.registry().set_last_seen(&id, now_millis() - 61_000);
        sweep_once(
            server.registry(),
            server.router(),
            server.metrics(),
            Duration::from_secs(60),
        )
        .await;

        // The write timeout bounds the stuck send
        timeout(Duration::from_secs(5), conn)
            .await
            .expect("stuck connection survived the reap")
            .expect("connection driver panicked");
        assert_eq!(server.registry().active(), 0);
    }
}
