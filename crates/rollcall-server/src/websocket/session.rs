//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rollcall_core::{Outbound, PeerId, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::ClientConnection;
use crate::manager::ConnectionManager;
use crate::router::{self, SenderContext};

/// How long the reader waits for the writer to flush after close.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session tunables.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue depth.
    pub max_send_queue: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Inbound silence after which the connection is dropped.
    pub heartbeat_timeout: Duration,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug)]
enum CloseReason {
    ClientClosed,
    Transport,
    Protocol,
    ServerClosed,
    Shutdown,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the peer; the manager sends `character_assigned` and the roster
/// 2. Dispatches incoming frames through the router
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. Unregisters and re-broadcasts the roster on any close
#[instrument(skip_all, fields(peer_id = %peer_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer_id: PeerId,
    manager: Arc<ConnectionManager>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.max_send_queue);
    let connection = Arc::new(ClientConnection::new(peer_id.clone(), send_tx));

    let writer = tokio::spawn(run_writer(ws_tx, send_rx, connection.clone(), config));

    let registration = match manager.connect(peer_id.clone(), connection.clone()) {
        Ok(registration) => registration,
        Err(conflict) => {
            info!(conn_id = %connection.id, error = %conflict, "connection refused");
            let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await;
            return;
        }
    };
    let sender = SenderContext::new(
        registration.peer_id,
        registration.identity,
        registration.connection_id,
    );
    info!(conn_id = %sender.connection_id, identity = %sender.identity, "client connected");

    let reason = loop {
        tokio::select! {
            () = connection.closed() => break CloseReason::ServerClosed,
            () = shutdown.cancelled() => break CloseReason::Shutdown,
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "transport error");
                        break CloseReason::Transport;
                    }
                    None => break CloseReason::ClientClosed,
                };
                connection.mark_alive();

                let result = match msg {
                    Message::Text(text) => router::handle_text(&manager, &sender, text.as_str()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => router::handle_text(&manager, &sender, text),
                        Err(_) => Err(ProtocolError::NotUtf8 { len: data.len() }),
                    },
                    Message::Close(_) => break CloseReason::ClientClosed,
                    Message::Ping(_) | Message::Pong(_) => Ok(()),
                };

                if let Err(e) = result {
                    let notice = Outbound::Error {
                        code: e.error_kind().to_string(),
                        message: e.to_string(),
                    };
                    if let Ok(frame) = notice.encode() {
                        let _ = connection.send(Arc::new(frame));
                    }
                    break CloseReason::Protocol;
                }
            }
        }
    };

    connection.close();
    let removed = manager.disconnect(&sender.peer_id, &sender.connection_id);
    info!(
        conn_id = %sender.connection_id,
        ?reason,
        removed,
        age_secs = connection.age().as_secs(),
        "client disconnected"
    );
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(conn_id = %sender.connection_id, "writer did not finish draining");
    }
}

/// Drain the outbound queue into the socket and send heartbeats.
///
/// On close, frames already queued are flushed before the Close frame. A
/// heartbeat timeout or socket error closes the connection, which stops the
/// reader.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    config: SessionConfig,
) {
    let mut ping_interval = tokio::time::interval(config.heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => {
                while let Ok(text) = send_rx.try_recv() {
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if connection.idle_for() > config.heartbeat_timeout {
                    warn!(
                        conn_id = %connection.id,
                        timeout_secs = config.heartbeat_timeout.as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    connection.close();
}
