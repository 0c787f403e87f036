//! Wire protocol: one JSON object per text frame, discriminated by `type`.
//!
//! Inbound frames decode into [`Inbound`]; any unrecognised `type` lands in
//! [`Inbound::Unknown`], which the router treats as a no-op. Outbound frames
//! are built as [`Outbound`] and serialized once per fan-out.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::PeerId;

/// Frames a client may send.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Opaque negotiation payload for one peer.
    WebrtcSignal {
        /// Recipient.
        to_user_id: PeerId,
        /// Forwarded untouched.
        signal_data: Value,
    },
    /// Announce a share to several peers.
    ShareNotification {
        /// Recipients; offline ones are skipped.
        to_user_ids: Vec<PeerId>,
        /// Forwarded untouched.
        share_data: Value,
    },
    /// Direct text message, echoed back to the sender.
    PrivateMessage {
        /// Recipient.
        to_user_id: PeerId,
        /// Message body.
        content: String,
    },
    /// Ask a peer to open a chat.
    ChatRequest {
        /// Recipient.
        to_user_id: PeerId,
    },
    /// Accept a pending chat request.
    ChatAccept {
        /// Recipient (the original requester).
        to_user_id: PeerId,
    },
    /// Decline a pending chat request.
    ChatDecline {
        /// Recipient (the original requester).
        to_user_id: PeerId,
    },
    /// Any other `type`. Ignored.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Decode one text frame.
    ///
    /// The frame must be a JSON object whose `type` is a string; known types
    /// must carry their fields with the right JSON types.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type") {
            Some(Value::String(_)) => Ok(serde_json::from_value(value)?),
            Some(_) => Err(serde_json::Error::custom("`type` must be a string").into()),
            None if value.is_object() => Err(serde_json::Error::missing_field("type").into()),
            None => Err(serde_json::Error::custom("frame must be a JSON object").into()),
        }
    }

    /// Wire name of this frame type, for logs and metric labels.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::WebrtcSignal { .. } => "webrtc_signal",
            Self::ShareNotification { .. } => "share_notification",
            Self::PrivateMessage { .. } => "private_message",
            Self::ChatRequest { .. } => "chat_request",
            Self::ChatAccept { .. } => "chat_accept",
            Self::ChatDecline { .. } => "chat_decline",
            Self::Unknown => "unknown",
        }
    }
}

/// One row of the roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Peer id of the session.
    pub user_id: PeerId,
    /// Identity drawn from the pool.
    pub character: String,
}

/// Frames the server sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// First frame on every new connection.
    CharacterAssigned {
        /// Assigned identity.
        character: String,
        /// Echo of the connection's peer id.
        user_id: PeerId,
    },
    /// Full roster, broadcast after every membership change.
    UserListUpdate {
        /// All active sessions.
        users: Vec<RosterEntry>,
    },
    /// Relayed negotiation payload.
    WebrtcSignal {
        /// Sender peer id.
        from_user_id: PeerId,
        /// Sender identity.
        from_character: String,
        /// Payload exactly as received.
        signal_data: Value,
    },
    /// Relayed share announcement.
    IncomingShare {
        /// Sender peer id.
        from_user_id: PeerId,
        /// Sender identity.
        from_character: String,
        /// Payload exactly as received.
        share_data: Value,
        /// When the server relayed it.
        timestamp: DateTime<Utc>,
    },
    /// Sent back to a sharer when at least one recipient was reached.
    ShareSuccess {
        /// Number of recipients the share was delivered to.
        count: usize,
    },
    /// Direct message, delivered to the recipient and echoed to the sender.
    PrivateMessage {
        /// Sender peer id.
        from_user_id: PeerId,
        /// Sender identity.
        from_character: String,
        /// Recipient peer id.
        to_user_id: PeerId,
        /// Message body.
        content: String,
        /// When the server relayed it.
        timestamp: DateTime<Utc>,
    },
    /// Relayed chat request.
    ChatRequest {
        /// Requester peer id.
        from_user_id: PeerId,
        /// Requester identity.
        from_character: String,
        /// Recipient peer id.
        to_user_id: PeerId,
    },
    /// Relayed chat acceptance.
    ChatAccept {
        /// Responder peer id.
        from_user_id: PeerId,
        /// Responder identity.
        from_character: String,
        /// Original requester.
        to_user_id: PeerId,
    },
    /// Relayed chat refusal.
    ChatDecline {
        /// Responder peer id.
        from_user_id: PeerId,
        /// Responder identity.
        from_character: String,
        /// Original requester.
        to_user_id: PeerId,
    },
    /// Sent to a connection that a newer connection with the same peer id
    /// has displaced, just before it is closed.
    SessionReplaced {
        /// The displaced peer id.
        user_id: PeerId,
    },
    /// Terminal error sent before the server closes a connection.
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl Outbound {
    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire name of this frame type.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::CharacterAssigned { .. } => "character_assigned",
            Self::UserListUpdate { .. } => "user_list_update",
            Self::WebrtcSignal { .. } => "webrtc_signal",
            Self::IncomingShare { .. } => "incoming_share",
            Self::ShareSuccess { .. } => "share_success",
            Self::PrivateMessage { .. } => "private_message",
            Self::ChatRequest { .. } => "chat_request",
            Self::ChatAccept { .. } => "chat_accept",
            Self::ChatDecline { .. } => "chat_decline",
            Self::SessionReplaced { .. } => "session_replaced",
            Self::Error { .. } => "error",
        }
    }
}

/// The three steps of the chat handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    /// `chat_request`
    Request,
    /// `chat_accept`
    Accept,
    /// `chat_decline`
    Decline,
}

impl ChatKind {
    /// Build the relayed envelope for this step.
    pub fn envelope(
        self,
        from_user_id: PeerId,
        from_character: String,
        to_user_id: PeerId,
    ) -> Outbound {
        match self {
            Self::Request => Outbound::ChatRequest {
                from_user_id,
                from_character,
                to_user_id,
            },
            Self::Accept => Outbound::ChatAccept {
                from_user_id,
                from_character,
                to_user_id,
            },
            Self::Decline => Outbound::ChatDecline {
                from_user_id,
                from_character,
                to_user_id,
            },
        }
    }
}
