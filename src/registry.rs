//! Connection registry: the authoritative map from connection id to
//! connection state and associated user identity.
//!
//! Every live transport link is registered here at accept time and
//! removed by the liveness supervisor once the grace window settles.
//! All operations on unknown ids are logged no-ops.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::ws::ConnectionSender;

/// Opaque connection identifier, generated at accept time.
pub type ConnectionId = Uuid;

/// Liveness state of a connection. Transitions are monotonic: once a
/// connection starts closing it never returns to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Public identity snapshot for a user, copied in at join time and
/// never re-fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// One live transport-layer link from a client to the hub.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    /// None until the client identifies itself.
    pub user: Option<UserSnapshot>,
    pub state: ConnState,
    /// Outbound channel to the connection's writer task.
    pub sender: ConnectionSender,
}

/// Shared registry of all live connections. Clones share the same map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection and assign its identifier.
    pub fn register(&self, sender: ConnectionSender) -> ConnectionId {
        let id = Uuid::now_v7();
        self.inner.insert(
            id,
            Connection {
                id,
                user: None,
                state: ConnState::Connecting,
                sender,
            },
        );
        tracing::debug!(connection_id = %id, "connection registered");
        id
    }

    /// Attach a user identity to a connection. Re-identification is not a
    /// supported operation: a second call with a different user logs a
    /// warning and the last write wins.
    pub fn associate_user(&self, id: ConnectionId, user: UserSnapshot) {
        match self.inner.get_mut(&id) {
            Some(mut conn) => {
                if let Some(prev) = &conn.user {
                    if prev.id != user.id {
                        tracing::warn!(
                            connection_id = %id,
                            previous_user = %prev.id,
                            replacement_user = %user.id,
                            "connection re-identified, last write wins"
                        );
                    }
                }
                conn.user = Some(user);
            }
            None => {
                tracing::debug!(connection_id = %id, "associate_user on unknown connection ignored");
            }
        }
    }

    pub fn mark_open(&self, id: ConnectionId) {
        self.advance(id, ConnState::Open);
    }

    pub fn mark_closing(&self, id: ConnectionId) {
        self.advance(id, ConnState::Closing);
    }

    fn advance(&self, id: ConnectionId, next: ConnState) {
        match self.inner.get_mut(&id) {
            Some(mut conn) => {
                if next > conn.state {
                    conn.state = next;
                } else {
                    tracing::debug!(
                        connection_id = %id,
                        current = ?conn.state,
                        requested = ?next,
                        "backwards state transition ignored"
                    );
                }
            }
            None => {
                tracing::debug!(connection_id = %id, "state change for unknown connection ignored");
            }
        }
    }

    /// Transition to `Closed` and remove from the map. Returns the removed
    /// connection, or None for an unknown id.
    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        match self.inner.remove(&id) {
            Some((_, mut conn)) => {
                conn.state = ConnState::Closed;
                tracing::debug!(connection_id = %id, "connection unregistered");
                Some(conn)
            }
            None => {
                tracing::debug!(connection_id = %id, "unregister of unknown connection ignored");
                None
            }
        }
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.get(&id).map(|conn| conn.clone())
    }

    /// Outbound sender for a connection, for fan-out.
    pub fn sender(&self, id: ConnectionId) -> Option<ConnectionSender> {
        self.inner.get(&id).map(|conn| conn.sender.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
