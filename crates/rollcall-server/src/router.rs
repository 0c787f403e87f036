//! Inbound message dispatch.

use chrono::Utc;
use metrics::counter;
use rollcall_core::{ChatKind, ConnectionId, Inbound, Outbound, PeerId, ProtocolError};
use rollcall_telemetry::metrics::{PROTOCOL_ERRORS_TOTAL, RELAY_MESSAGES_TOTAL};
use serde_json::Value;
use tracing::{debug, warn};

use crate::chat;
use crate::manager::{ConnectionManager, Delivery};

/// The session an inbound frame came from.
#[derive(Clone, Debug)]
pub struct SenderContext {
    /// Sender peer id.
    pub peer_id: PeerId,
    /// Sender identity, fixed at registration.
    pub identity: String,
    /// Sender's connection.
    pub connection_id: ConnectionId,
}

impl SenderContext {
    /// Bundle a sender.
    pub fn new(peer_id: PeerId, identity: String, connection_id: ConnectionId) -> Self {
        Self {
            peer_id,
            identity,
            connection_id,
        }
    }
}

/// Decode a text frame and dispatch it.
///
/// A decode error is returned to the caller, which closes the connection.
pub fn handle_text(
    manager: &ConnectionManager,
    from: &SenderContext,
    text: &str,
) -> Result<(), ProtocolError> {
    match Inbound::decode(text) {
        Ok(message) => {
            dispatch(manager, from, message);
            Ok(())
        }
        Err(e) => {
            counter!(PROTOCOL_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
            warn!(
                peer_id = %from.peer_id,
                conn_id = %from.connection_id,
                error = %e,
                "rejecting frame"
            );
            Err(e)
        }
    }
}

/// Route one decoded frame.
pub fn dispatch(manager: &ConnectionManager, from: &SenderContext, message: Inbound) {
    let message_type = message.message_type();
    counter!(RELAY_MESSAGES_TOTAL, "type" => message_type).increment(1);
    debug!(peer_id = %from.peer_id, message_type, "dispatching");

    match message {
        Inbound::WebrtcSignal {
            to_user_id,
            signal_data,
        } => {
            let _ = manager.send_to(
                &to_user_id,
                &Outbound::WebrtcSignal {
                    from_user_id: from.peer_id.clone(),
                    from_character: from.identity.clone(),
                    signal_data,
                },
            );
        }
        Inbound::ShareNotification {
            to_user_ids,
            share_data,
        } => share(manager, from, &to_user_ids, share_data),
        Inbound::PrivateMessage { to_user_id, content } => {
            let envelope = Outbound::PrivateMessage {
                from_user_id: from.peer_id.clone(),
                from_character: from.identity.clone(),
                to_user_id: to_user_id.clone(),
                content,
                timestamp: Utc::now(),
            };
            let _ = manager.send_to(&to_user_id, &envelope);
            if to_user_id != from.peer_id {
                let _ = manager.send_to(&from.peer_id, &envelope);
            }
        }
        Inbound::ChatRequest { to_user_id } => {
            let _ = chat::relay(manager, from, ChatKind::Request, to_user_id);
        }
        Inbound::ChatAccept { to_user_id } => {
            let _ = chat::relay(manager, from, ChatKind::Accept, to_user_id);
        }
        Inbound::ChatDecline { to_user_id } => {
            let _ = chat::relay(manager, from, ChatKind::Decline, to_user_id);
        }
        Inbound::Unknown => {}
    }
}

fn share(
    manager: &ConnectionManager,
    from: &SenderContext,
    to_user_ids: &[PeerId],
    share_data: Value,
) {
    let notice = Outbound::IncomingShare {
        from_user_id: from.peer_id.clone(),
        from_character: from.identity.clone(),
        share_data,
        timestamp: Utc::now(),
    };
    let count = to_user_ids
        .iter()
        .filter(|to| manager.send_to(to, &notice) == Delivery::Delivered)
        .count();
    debug!(peer_id = %from.peer_id, recipients = to_user_ids.len(), count, "share fanned out");
    if count > 0 {
        let _ = manager.send_to(&from.peer_id, &Outbound::ShareSuccess { count });
    }
}
