//! Connection manager: all outbound sends and every membership change.
//!
//! The [`SessionRegistry`] sits behind a single lock. Register, unregister,
//! and the roster fan-out that follows each of them all happen while the
//! lock is held, so every client sees roster frames in the order the
//! registry changed. Enqueueing is `try_send`, so nothing awaits under the
//! lock.

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use rollcall_core::{ConnectionId, IdentityPool, Outbound, PeerId, RegistryConflict, RosterEntry};
use rollcall_settings::DuplicatePeerPolicy;
use rollcall_telemetry::metrics::{
    RELAY_DELIVERY_FAILURES_TOTAL, ROSTER_BROADCASTS_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
    WS_REJECTED_TOTAL,
};
use tracing::{debug, info, warn};

use crate::connection::ClientConnection;
use crate::registry::{Registration, SessionRegistry};

/// Outcome of a directed send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued for the recipient's writer.
    Delivered,
    /// No active session for the recipient; nothing happened.
    Offline,
    /// The recipient's queue was full or closed; its session was torn down.
    Failed,
}

/// Owns the registry and performs every outbound send.
pub struct ConnectionManager {
    registry: Mutex<SessionRegistry>,
}

impl ConnectionManager {
    /// Create a manager with an empty registry.
    pub fn new(pool: IdentityPool, policy: DuplicatePeerPolicy) -> Self {
        Self {
            registry: Mutex::new(SessionRegistry::new(pool, policy)),
        }
    }

    /// Register a new connection, greet it, and broadcast the roster.
    ///
    /// The new connection receives `character_assigned` before the roster
    /// update. Under [`DuplicatePeerPolicy::Reject`] a conflicting connection
    /// instead receives `error{code:"peer_id_in_use"}` and is closed; the
    /// roster does not change.
    pub fn connect(
        &self,
        peer_id: PeerId,
        connection: Arc<ClientConnection>,
    ) -> Result<Registration, RegistryConflict> {
        let mut registry = self.registry.lock();
        let result = registry.register(peer_id, connection.clone());
        match result {
            Ok(registration) => {
                counter!(WS_CONNECTIONS_TOTAL).increment(1);
                if let Some(replaced) = &registration.replaced {
                    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
                    info!(
                        peer_id = %registration.peer_id,
                        old_conn_id = %replaced,
                        conn_id = %registration.connection_id,
                        "session replaced by newer connection"
                    );
                }
                let greeting = Outbound::CharacterAssigned {
                    character: registration.identity.clone(),
                    user_id: registration.peer_id.clone(),
                };
                if let Some(frame) = encode_frame(&greeting) {
                    if let Err(e) = connection.send(frame) {
                        // The roster broadcast below observes the same failure
                        // and removes the session.
                        debug!(peer_id = %registration.peer_id, error = %e, "greeting not queued");
                    }
                }
                broadcast_roster(&mut registry);
                if !owns_session(&registry, &registration) {
                    // The joiner failed its own roster send and was removed in
                    // that sweep; everyone else still lists it.
                    warn!(
                        peer_id = %registration.peer_id,
                        conn_id = %registration.connection_id,
                        "new session dropped while joining"
                    );
                    broadcast_roster(&mut registry);
                }
                Ok(registration)
            }
            Err(conflict) => {
                drop(registry);
                counter!(WS_REJECTED_TOTAL, "reason" => "peer_id_in_use").increment(1);
                warn!(
                    peer_id = %conflict.peer_id,
                    conn_id = %connection.id,
                    "duplicate peer id rejected"
                );
                let notice = Outbound::Error {
                    code: RegistryConflict::CODE.to_string(),
                    message: conflict.to_string(),
                };
                if let Some(frame) = encode_frame(&notice) {
                    let _ = connection.send(frame);
                }
                connection.close();
                Err(conflict)
            }
        }
    }

    /// Tear down the session owned by `connection_id` and broadcast the
    /// roster. Returns `false` (and broadcasts nothing) when that connection
    /// no longer owns the session.
    pub fn disconnect(&self, peer_id: &PeerId, connection_id: &ConnectionId) -> bool {
        let mut registry = self.registry.lock();
        let Some(connection) = registry.get(peer_id).map(|s| s.connection.clone()) else {
            return false;
        };
        if !registry.unregister_connection(peer_id, connection_id) {
            return false;
        }
        connection.close();
        record_disconnect(&connection);
        broadcast_roster(&mut registry);
        true
    }

    /// Send one frame to one peer.
    ///
    /// A failed enqueue removes the recipient's session, closes its
    /// connection, and broadcasts the roster once. The frame is dropped.
    pub fn send_to(&self, peer_id: &PeerId, message: &Outbound) -> Delivery {
        let Some(frame) = encode_frame(message) else {
            return Delivery::Failed;
        };
        let mut registry = self.registry.lock();
        let Some(connection) = registry.get(peer_id).map(|s| s.connection.clone()) else {
            return Delivery::Offline;
        };
        match connection.send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                counter!(RELAY_DELIVERY_FAILURES_TOTAL).increment(1);
                warn!(
                    peer_id = %peer_id,
                    conn_id = %connection.id,
                    message_type = message.message_type(),
                    error = %e,
                    "delivery failed, dropping session"
                );
                if registry.unregister_connection(peer_id, &connection.id) {
                    connection.close();
                    record_disconnect(&connection);
                    broadcast_roster(&mut registry);
                }
                Delivery::Failed
            }
        }
    }

    /// Send one frame to every active peer. Returns how many were reached.
    ///
    /// Peers whose send fails are removed in the same pass without a
    /// follow-up roster broadcast.
    pub fn broadcast(&self, message: &Outbound) -> usize {
        let Some(frame) = encode_frame(message) else {
            return 0;
        };
        let mut registry = self.registry.lock();
        fan_out_locked(&mut registry, &frame)
    }

    /// Current roster in registration order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.registry.lock().snapshot()
    }

    /// Whether `peer_id` has an active session.
    pub fn is_online(&self, peer_id: &PeerId) -> bool {
        self.registry.lock().get(peer_id).is_some()
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Close every live connection. Their session tasks unregister them.
    pub fn close_all(&self) -> usize {
        let registry = self.registry.lock();
        let sessions = registry.sessions();
        for session in &sessions {
            session.connection.close();
        }
        sessions.len()
    }
}

/// Serialize once for fan-out.
fn encode_frame(message: &Outbound) -> Option<Arc<String>> {
    match message.encode() {
        Ok(text) => Some(Arc::new(text)),
        Err(e) => {
            warn!(message_type = message.message_type(), error = %e, "failed to encode frame");
            None
        }
    }
}

/// Broadcast the current roster to every active peer. Returns how many were
/// reached. Peers that fail are removed without a follow-up broadcast.
fn broadcast_roster(registry: &mut SessionRegistry) -> usize {
    let users = registry.snapshot();
    let count = users.len();
    let Some(frame) = encode_frame(&Outbound::UserListUpdate { users }) else {
        return 0;
    };
    counter!(ROSTER_BROADCASTS_TOTAL).increment(1);
    debug!(users = count, "broadcasting roster");
    fan_out_locked(registry, &frame)
}

fn fan_out_locked(registry: &mut SessionRegistry, frame: &Arc<String>) -> usize {
    let mut delivered = 0;
    let mut failed = Vec::new();
    for session in registry.sessions() {
        match session.connection.send(Arc::clone(frame)) {
            Ok(()) => delivered += 1,
            Err(e) => {
                counter!(RELAY_DELIVERY_FAILURES_TOTAL).increment(1);
                warn!(
                    peer_id = %session.peer_id,
                    conn_id = %session.connection.id,
                    error = %e,
                    "broadcast delivery failed"
                );
                failed.push(session.connection.clone());
            }
        }
    }
    for connection in failed {
        if registry.unregister_connection(&connection.peer_id, &connection.id) {
            connection.close();
            record_disconnect(&connection);
        }
    }
    gauge!(WS_CONNECTIONS_ACTIVE).set(registry.len() as f64);
    delivered
}

fn owns_session(registry: &SessionRegistry, registration: &Registration) -> bool {
    registry
        .get(&registration.peer_id)
        .is_some_and(|s| s.connection.id == registration.connection_id)
}

fn record_disconnect(connection: &ClientConnection) {
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}
