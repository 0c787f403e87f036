//! Chat handshake relay.
//!
//! Request, accept and decline are forwarded to the named peer and nothing
//! else. The server keeps no handshake state: a request that is never
//! answered stays pending on the clients indefinitely.

use rollcall_core::{ChatKind, PeerId};
use tracing::debug;

use crate::manager::{ConnectionManager, Delivery};
use crate::router::SenderContext;

/// Forward one handshake step from `from` to `to_user_id`.
pub fn relay(
    manager: &ConnectionManager,
    from: &SenderContext,
    kind: ChatKind,
    to_user_id: PeerId,
) -> Delivery {
    let envelope = kind.envelope(from.peer_id.clone(), from.identity.clone(), to_user_id.clone());
    let delivery = manager.send_to(&to_user_id, &envelope);
    debug!(
        from = %from.peer_id,
        to = %to_user_id,
        step = envelope.message_type(),
        ?delivery,
        "chat handshake relayed"
    );
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use rollcall_core::IdentityPool;
    use rollcall_settings::DuplicatePeerPolicy;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::connection::ClientConnection;

    fn setup() -> (
        ConnectionManager,
        SenderContext,
        mpsc::Receiver<Arc<String>>,
        mpsc::Receiver<Arc<String>>,
    ) {
        let manager = ConnectionManager::new(IdentityPool::default(), DuplicatePeerPolicy::Replace);
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        let a = Arc::new(ClientConnection::new(PeerId::from_raw("alice"), tx_a));
        let b = Arc::new(ClientConnection::new(PeerId::from_raw("bob"), tx_b));
        let reg = manager.connect(a.peer_id.clone(), a.clone()).unwrap();
        let _ = manager.connect(b.peer_id.clone(), b.clone()).unwrap();
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}
        let from = SenderContext::new(reg.peer_id, reg.identity, reg.connection_id);
        (manager, from, rx_a, rx_b)
    }

    #[test]
    fn each_step_relays_with_sender_fields() {
        let (manager, from, _rx_a, mut rx_b) = setup();
        for (kind, wire) in [
            (ChatKind::Request, "chat_request"),
            (ChatKind::Accept, "chat_accept"),
            (ChatKind::Decline, "chat_decline"),
        ] {
            let d = relay(&manager, &from, kind, PeerId::from_raw("bob"));
            assert_eq!(d, Delivery::Delivered);
            let frame: Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
            assert_eq!(frame["type"], wire);
            assert_eq!(frame["from_user_id"], "alice");
            assert_eq!(frame["from_character"], from.identity.as_str());
            assert_eq!(frame["to_user_id"], "bob");
        }
    }

    #[test]
    fn offline_target_is_noop() {
        let (manager, from, mut rx_a, _rx_b) = setup();
        let d = relay(&manager, &from, ChatKind::Request, PeerId::from_raw("carol"));
        assert_eq!(d, Delivery::Offline);
        assert!(rx_a.try_recv().is_err());
    }

    // Unanswered requests are never expired by the server.
    #[tokio::test(start_paused = true)]
    async fn pending_request_never_times_out() {
        let (manager, from, mut rx_a, mut rx_b) = setup();
        let _ = relay(&manager, &from, ChatKind::Request, PeerId::from_raw("bob"));
        let _ = rx_b.recv().await.unwrap();

        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(manager.len(), 2);
    }
}
