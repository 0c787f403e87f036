//! Error types for the relay core.
//!
//! - [`ProtocolError`]: an inbound frame could not be decoded. Fatal to the
//!   offending connection only.
//! - [`DeliveryError`]: an outbound frame could not be enqueued for a peer.
//!   The connection manager turns this into session teardown.
//! - [`RegistryConflict`]: a second connection claimed a peer id that is
//!   already active while the registry rejects duplicates.

use thiserror::Error;

use crate::ids::PeerId;

/// Inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not a JSON object with a usable `type`, or a known type with bad fields.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Binary frame whose payload is not UTF-8.
    #[error("binary frame is not valid UTF-8 ({len} bytes)")]
    NotUtf8 {
        /// Payload length.
        len: usize,
    },
}

impl ProtocolError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotUtf8 { .. } => "not_utf8",
        }
    }
}

/// Outbound frame could not be handed to the connection writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The bounded outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
    /// The writer has stopped; the socket is gone.
    #[error("connection closed")]
    Closed,
}

/// A peer id is already held by an active session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("peer id '{peer_id}' is already connected")]
pub struct RegistryConflict {
    /// The contested peer id.
    pub peer_id: PeerId,
}

impl RegistryConflict {
    /// Wire error code sent to the rejected client.
    pub const CODE: &'static str = "peer_id_in_use";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: ProtocolError = err.into();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(err.error_kind(), "malformed");
        assert!(err.to_string().starts_with("malformed frame"));
    }

    #[test]
    fn not_utf8_display() {
        let err = ProtocolError::NotUtf8 { len: 3 };
        assert_eq!(err.error_kind(), "not_utf8");
        assert!(err.to_string().contains("3 bytes"));
    }

    #[test]
    fn delivery_error_display() {
        assert_eq!(DeliveryError::QueueFull.to_string(), "outbound queue full");
        assert_eq!(DeliveryError::Closed.to_string(), "connection closed");
    }

    #[test]
    fn registry_conflict_names_peer() {
        let err = RegistryConflict {
            peer_id: PeerId::from_raw("alice"),
        };
        assert_eq!(err.to_string(), "peer id 'alice' is already connected");
        assert_eq!(RegistryConflict::CODE, "peer_id_in_use");
    }
}
