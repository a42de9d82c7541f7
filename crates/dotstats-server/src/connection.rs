//! WebSocket plumbing for node and feed connections.
//!
//! Each socket is split into a reader that turns frames into
//! [`ConnectionEvent`]s and a writer that drains a [`ChannelOutbound`] queue.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dotstats_core::ids::NodeId;
use dotstats_telemetry::MetricsRecorder;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hub::HubHandle;
use crate::node::NodeSession;
use crate::transport::{ChannelOutbound, ConnectionEvent, Outbound};

/// Forward inbound frames as connection events until the socket ends.
async fn read_frames(mut ws_rx: SplitStream<WebSocket>, tx: mpsc::UnboundedSender<ConnectionEvent>) {
    while let Some(frame) = ws_rx.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => ConnectionEvent::Message(text.as_str().as_bytes().to_vec()),
            Ok(WsMessage::Binary(bytes)) => ConnectionEvent::Message(bytes.to_vec()),
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue, // axum answers pings
            Err(error) => {
                let _ = tx.send(ConnectionEvent::Error(error.to_string()));
                return;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
    let _ = tx.send(ConnectionEvent::Close);
}

/// Write queued frames until the queue closes or `closed` fires.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
            frame = rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Drive one node connection: handshake, then relay its events to the hub.
pub async fn serve_node(
    socket: WebSocket,
    hub: HubHandle,
    metrics: Arc<MetricsRecorder>,
    handshake_timeout: Duration,
    max_send_queue: usize,
) {
    let (ws_tx, ws_rx) = socket.split();
    let (outbound, out_rx) = ChannelOutbound::new(max_send_queue);
    let outbound = Arc::new(outbound);
    let writer = tokio::spawn(write_frames(ws_tx, out_rx, outbound.closed_token()));

    let (in_tx, mut in_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_frames(ws_rx, in_tx));

    let session = match NodeSession::accept(
        &mut in_rx,
        outbound.clone(),
        &hub.ids().nodes,
        handshake_timeout,
    )
    .await
    {
        Ok(session) => session,
        Err(error) => {
            metrics.counter_inc("handshake.failures", &[("reason", error.reason())], 1);
            tracing::warn!(%error, "node handshake failed");
            reader.abort();
            let _ = writer.await;
            return;
        }
    };

    let id = session.id();
    hub.add_node(session);

    relay_node_events(&mut in_rx, &hub, id, outbound.closed_token()).await;

    reader.abort();
    // stop the writer even if the hub has already stopped
    outbound.close();
    let _ = writer.await;
    tracing::debug!(node_id = %id, dropped = outbound.drop_count(), "node connection ended");
}

/// Forward a node's connection events to the hub until the connection ends
/// or the session is closed from the hub side.
async fn relay_node_events(
    inbound: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    hub: &HubHandle,
    id: NodeId,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => break,
            event = inbound.recv() => match event {
                Some(event) => {
                    let terminal = event.is_terminal();
                    hub.node_event(id, event);
                    if terminal {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Drive one feed connection until the client goes away.
pub async fn serve_feed(socket: WebSocket, hub: HubHandle, max_send_queue: usize) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbound, out_rx) = ChannelOutbound::new(max_send_queue);
    let outbound = Arc::new(outbound);
    let closed = outbound.closed_token();
    let mut writer = tokio::spawn(write_frames(ws_tx, out_rx, closed.clone()));

    let feed_id = hub.add_feed(outbound.clone());

    // Feeds have nothing to say; watch for the client leaving.
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => {
                hub.remove_feed(feed_id);
                return;
            }
            () = closed.cancelled() => break,
        }
    }

    hub.remove_feed(feed_id);
    closed.cancel();
    let _ = writer.await;
    tracing::debug!(%feed_id, dropped = outbound.drop_count(), "feed connection ended");
}
