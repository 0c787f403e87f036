//! Session registry: the single owner of session lifetime.
//!
//! Maps caller-supplied peer ids to their live session. At most one session
//! exists per peer id; what happens on a second connection is decided by the
//! [`DuplicatePeerPolicy`]. The registry itself is not synchronized; the
//! [`ConnectionManager`](crate::manager::ConnectionManager) holds it behind one
//! lock so that membership changes and the roster frames they trigger are
//! totally ordered.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_core::{ConnectionId, IdentityPool, Outbound, PeerId, RegistryConflict, RosterEntry};
use rollcall_settings::DuplicatePeerPolicy;
use tracing::{debug, warn};

use crate::connection::ClientConnection;

/// One active session.
#[derive(Clone, Debug)]
pub struct Session {
    /// Peer id from the connection URL.
    pub peer_id: PeerId,
    /// Identity drawn from the pool.
    pub identity: String,
    /// When the session was registered.
    pub connected_at: DateTime<Utc>,
    /// Outbound handle.
    pub connection: Arc<ClientConnection>,
    seq: u64,
}

/// Result of a successful [`SessionRegistry::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Registered peer id.
    pub peer_id: PeerId,
    /// Assigned identity.
    pub identity: String,
    /// Connection the session is bound to.
    pub connection_id: ConnectionId,
    /// Connection that was evicted to make room, if any.
    pub replaced: Option<ConnectionId>,
}

/// Process-wide map from peer id to session.
pub struct SessionRegistry {
    sessions: HashMap<PeerId, Session>,
    pool: IdentityPool,
    policy: DuplicatePeerPolicy,
    next_seq: u64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(pool: IdentityPool, policy: DuplicatePeerPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            pool,
            policy,
            next_seq: 0,
        }
    }

    /// Register `connection` under `peer_id` and assign it an identity.
    ///
    /// If the peer id is already active, [`DuplicatePeerPolicy::Replace`]
    /// notifies and closes the old connection before installing the new one;
    /// [`DuplicatePeerPolicy::Reject`] leaves the existing session untouched
    /// and returns [`RegistryConflict`].
    pub fn register(
        &mut self,
        peer_id: PeerId,
        connection: Arc<ClientConnection>,
    ) -> Result<Registration, RegistryConflict> {
        let replaced = match (self.sessions.contains_key(&peer_id), self.policy) {
            (true, DuplicatePeerPolicy::Reject) => {
                return Err(RegistryConflict { peer_id });
            }
            (true, DuplicatePeerPolicy::Replace) => self.sessions.remove(&peer_id).map(|old| {
                evict(&old);
                old.connection.id.clone()
            }),
            (false, _) => None,
        };

        let identity = {
            let in_use = self.sessions.values().map(|s| s.identity.as_str());
            self.pool.assign(in_use, &mut rand::rng())
        };
        let seq = self.next_seq;
        self.next_seq += 1;

        let registration = Registration {
            peer_id: peer_id.clone(),
            identity: identity.clone(),
            connection_id: connection.id.clone(),
            replaced,
        };
        let _ = self.sessions.insert(
            peer_id.clone(),
            Session {
                peer_id,
                identity,
                connected_at: Utc::now(),
                connection,
                seq,
            },
        );
        Ok(registration)
    }

    /// Remove the session for `peer_id`, whichever connection holds it.
    ///
    /// Idempotent: removing an absent peer returns `None`.
    pub fn unregister(&mut self, peer_id: &PeerId) -> Option<Session> {
        self.sessions.remove(peer_id)
    }

    /// Remove the session for `peer_id` only if it is still bound to
    /// `connection_id`. Returns whether a session was removed.
    pub fn unregister_connection(
        &mut self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
    ) -> bool {
        match self.sessions.get(peer_id) {
            Some(session) if session.connection.id == *connection_id => {
                let _ = self.sessions.remove(peer_id);
                true
            }
            _ => false,
        }
    }

    /// Current roster in registration order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.ordered()
            .into_iter()
            .map(|s| RosterEntry {
                user_id: s.peer_id.clone(),
                character: s.identity.clone(),
            })
            .collect()
    }

    /// Active sessions in registration order.
    pub fn sessions(&self) -> Vec<&Session> {
        self.ordered()
    }

    /// Look up a session.
    pub fn get(&self, peer_id: &PeerId) -> Option<&Session> {
        self.sessions.get(peer_id)
    }

    /// Identity of an active peer.
    pub fn identity_of(&self, peer_id: &PeerId) -> Option<&str> {
        self.sessions.get(peer_id).map(|s| s.identity.as_str())
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn ordered(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }
}

fn evict(old: &Session) {
    let notice = Outbound::SessionReplaced {
        user_id: old.peer_id.clone(),
    };
    match notice.encode() {
        Ok(frame) => {
            if let Err(e) = old.connection.send(Arc::new(frame)) {
                debug!(peer_id = %old.peer_id, error = %e, "could not notify replaced connection");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode session_replaced"),
    }
    old.connection.close();
}
