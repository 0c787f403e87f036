//! Per-socket outbound handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rollcall_core::{ConnectionId, DeliveryError, PeerId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A connected WebSocket client, as seen by everything except its own
/// reader and writer tasks.
pub struct ClientConnection {
    /// Server-minted id for this socket.
    pub id: ConnectionId,
    /// Peer id claimed in the upgrade URL.
    pub peer_id: PeerId,
    /// Send channel to the socket's writer task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cancelled once the connection should stop; the writer drains and closes.
    close: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last inbound frame of any kind arrived.
    last_activity: Mutex<Instant>,
}

impl ClientConnection {
    /// Create a new connection with a fresh [`ConnectionId`].
    pub fn new(peer_id: PeerId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            peer_id,
            tx,
            close: CancellationToken::new(),
            connected_at: now,
            last_activity: Mutex::new(now),
        }
    }

    /// Queue a text frame for the writer.
    ///
    /// Never blocks. A full queue or a stopped writer is reported as a
    /// [`DeliveryError`]; the frame is dropped either way.
    pub fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        if self.close.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the writer to flush what is queued and close the socket.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(PeerId::from_raw("alice"), tx);
        (conn, rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(8);
        conn.send(Arc::new("hello".into())).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn send_to_closed_channel_fails() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert_eq!(conn.send(Arc::new("x".into())), Err(DeliveryError::Closed));
    }

    #[test]
    fn send_to_full_channel_fails() {
        let (conn, _rx) = make_connection(1);
        conn.send(Arc::new("first".into())).unwrap();
        assert_eq!(
            conn.send(Arc::new("second".into())),
            Err(DeliveryError::QueueFull)
        );
    }

    #[test]
    fn send_after_close_fails() {
        let (conn, _rx) = make_connection(8);
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.send(Arc::new("late".into())), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (conn, _rx) = make_connection(8);
        conn.close();
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
    }

    #[test]
    fn each_connection_gets_distinct_id() {
        let (a, _rx_a) = make_connection(1);
        let (b, _rx_b) = make_connection(1);
        assert_ne!(a.id, b.id);
        assert!(a.id.as_str().starts_with("conn_"));
    }

    #[test]
    fn idle_resets_on_activity() {
        let (conn, _rx) = make_connection(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.idle_for() >= Duration::from_millis(20));
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn frames_keep_issue_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            conn.send(Arc::new(format!("msg_{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }
}
