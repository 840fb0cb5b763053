//! Server-side liveness supervision: distinguishes a departed
//! participant from a transient network blip.
//!
//! On transport loss a connection's memberships are not pruned; a
//! pending departure holds them through a grace window. A replacement
//! connection joining as the same user reclaims sessions one by one and
//! suppresses the join/leave churn; whatever is left unreclaimed when
//! the timer fires is finalized with `user-left` broadcasts.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::session::tracker::SessionTracker;
use crate::ws::broadcast::broadcast_to_members;
use crate::ws::protocol::ServerEvent;

struct PendingDeparture {
    user_id: String,
    /// Sessions not yet reclaimed by a replacement connection.
    sessions: Arc<DashSet<String>>,
    timer: JoinHandle<()>,
}

struct Inner {
    pending: DashMap<ConnectionId, PendingDeparture>,
    grace: Duration,
}

/// Supervisor handle held by AppState; clones share the pending table.
#[derive(Clone)]
pub struct LivenessSupervisor {
    inner: Arc<Inner>,
}

impl LivenessSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                grace,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace
    }

    /// Transport closed for a connection. Connections with no identity or
    /// no memberships are finalized immediately; anything else gets a
    /// pending departure and a grace timer.
    pub fn connection_lost(
        &self,
        registry: &ConnectionRegistry,
        tracker: &SessionTracker,
        connection_id: ConnectionId,
    ) {
        let Some(connection) = registry.lookup(connection_id) else {
            tracing::debug!(connection_id = %connection_id, "loss of unknown connection ignored");
            return;
        };
        registry.mark_closing(connection_id);

        let sessions = tracker.sessions_of(connection_id);
        let user_id = match connection.user {
            Some(user) if !sessions.is_empty() => user.id,
            _ => {
                registry.unregister(connection_id);
                return;
            }
        };

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            grace_ms = self.inner.grace.as_millis() as u64,
            "transport lost, departure pending"
        );

        let session_set: Arc<DashSet<String>> = Arc::new(sessions.into_iter().collect());
        let timer = tokio::spawn(expire_after(
            self.inner.clone(),
            registry.clone(),
            tracker.clone(),
            connection_id,
            session_set.clone(),
        ));
        self.inner.pending.insert(
            connection_id,
            PendingDeparture {
                user_id,
                sessions: session_set,
                timer,
            },
        );
    }

    /// A live connection for `user_id` claimed `session_id`: cancel that
    /// session's pending departure, if any. Returns the old connection id
    /// whose departure was (partially) cancelled. Once every session of a
    /// pending departure is reclaimed, its timer is aborted and the old
    /// connection unregistered without any `user-left` broadcast.
    pub fn cancel_pending(
        &self,
        registry: &ConnectionRegistry,
        user_id: &str,
        session_id: &str,
    ) -> Option<ConnectionId> {
        let key = self.inner.pending.iter().find_map(|entry| {
            let pending = entry.value();
            (pending.user_id == user_id && pending.sessions.contains(session_id))
                .then(|| *entry.key())
        })?;

        let fully_reclaimed = {
            let entry = self.inner.pending.get(&key)?;
            entry.sessions.remove(session_id);
            entry.sessions.is_empty()
        };

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            old_connection = %key,
            "pending departure cancelled by reconnection"
        );

        if fully_reclaimed {
            if let Some((_, departure)) = self.inner.pending.remove(&key) {
                departure.timer.abort();
                registry.unregister(key);
            }
        }

        Some(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Hub teardown: no grace timer may outlive the hub.
    pub fn shutdown(&self) {
        for entry in self.inner.pending.iter() {
            entry.value().timer.abort();
        }
        self.inner.pending.clear();
    }
}

/// Grace timer body: finalize whatever the replacement connections did
/// not reclaim.
async fn expire_after(
    inner: Arc<Inner>,
    registry: ConnectionRegistry,
    tracker: SessionTracker,
    connection_id: ConnectionId,
    sessions: Arc<DashSet<String>>,
) {
    tokio::time::sleep(inner.grace).await;

    let remaining: Vec<String> = sessions.iter().map(|s| s.key().clone()).collect();
    for session_id in remaining {
        if let Some(entry) = tracker.leave(&session_id, connection_id) {
            tracing::info!(
                session_id = %session_id,
                user_id = %entry.user.id,
                "departure finalized after grace window"
            );
            let others = tracker.members_of(&session_id);
            broadcast_to_members(
                &registry,
                &others,
                None,
                &ServerEvent::UserLeft {
                    session_id: session_id.clone(),
                    user_id: entry.user.id,
                },
            );
        }
    }

    registry.unregister(connection_id);
    inner.pending.remove(&connection_id);
}
