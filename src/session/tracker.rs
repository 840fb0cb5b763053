//! Session membership tracker: session-id -> ordered member list, plus
//! the reverse index connection-id -> session set for fast cleanup on
//! disconnect.
//!
//! A user holds at most one membership entry per session; joining again
//! (same or replacement connection) updates the entry in place. Sessions
//! whose member set becomes empty are pruned, dropping their in-memory
//! chat transcript with them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::registry::{ConnectionId, UserSnapshot};

/// Learning-session identifier, opaque to the hub.
pub type SessionId = String;

/// One user's participation in one learning session.
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub user: UserSnapshot,
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
}

/// An ephemeral chat line, retained only while the session lives.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub user: UserSnapshot,
    pub message: String,
    /// Server-stamped emission time, milliseconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Insertion order, for deterministic "who's here" displays.
    members: Vec<MemberEntry>,
    transcript: Vec<ChatMessage>,
}

/// Outcome of a join: the members present before the join (the joiner's
/// own prior entry excluded) and whether an existing entry was resumed
/// rather than created.
pub struct JoinOutcome {
    pub existing: Vec<MemberEntry>,
    pub resumed: bool,
}

/// In-memory session membership manager. Clones share the same maps.
#[derive(Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashMap<SessionId, SessionState>>,
    /// Reverse index: which sessions each connection belongs to.
    index: Arc<DashMap<ConnectionId, HashSet<SessionId>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a session. Idempotent per user: a repeated join
    /// updates the snapshot and connection id in place instead of
    /// duplicating the entry — this is also the reconnection takeover
    /// path.
    pub fn join(
        &self,
        session_id: &str,
        connection_id: ConnectionId,
        user: UserSnapshot,
    ) -> JoinOutcome {
        let mut old_connection = None;
        let (existing, resumed) = {
            let mut entry = self.sessions.entry(session_id.to_string()).or_default();
            let state = entry.value_mut();

            let resumed = match state.members.iter_mut().find(|m| m.user.id == user.id) {
                Some(member) => {
                    if member.connection_id != connection_id {
                        old_connection = Some(member.connection_id);
                        member.connection_id = connection_id;
                    }
                    member.user = user;
                    true
                }
                None => {
                    state.members.push(MemberEntry {
                        user,
                        connection_id,
                        joined_at: Utc::now(),
                    });
                    false
                }
            };

            let existing: Vec<MemberEntry> = state
                .members
                .iter()
                .filter(|m| m.connection_id != connection_id)
                .cloned()
                .collect();
            (existing, resumed)
        };

        self.index
            .entry(connection_id)
            .or_default()
            .insert(session_id.to_string());

        // The replaced connection no longer belongs to this session.
        if let Some(old) = old_connection {
            if let Some(mut set) = self.index.get_mut(&old) {
                set.remove(session_id);
                if set.is_empty() {
                    drop(set);
                    self.index.remove(&old);
                }
            }
        }

        JoinOutcome { existing, resumed }
    }

    /// Remove the member bound to `connection_id` from a session. Empty
    /// sessions are pruned. Returns the removed entry, or None if the
    /// connection held no membership there.
    pub fn leave(&self, session_id: &str, connection_id: ConnectionId) -> Option<MemberEntry> {
        let removed = {
            let mut entry = self.sessions.get_mut(session_id)?;
            let state = entry.value_mut();
            let pos = state
                .members
                .iter()
                .position(|m| m.connection_id == connection_id)?;
            let removed = state.members.remove(pos);
            let now_empty = state.members.is_empty();
            drop(entry);
            if now_empty {
                self.sessions.remove(session_id);
            }
            removed
        };

        if let Some(mut set) = self.index.get_mut(&connection_id) {
            set.remove(session_id);
            if set.is_empty() {
                drop(set);
                self.index.remove(&connection_id);
            }
        }

        Some(removed)
    }

    /// Current members of a session, in insertion order.
    pub fn members_of(&self, session_id: &str) -> Vec<MemberEntry> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    /// Every session a connection currently belongs to.
    pub fn sessions_of(&self, connection_id: ConnectionId) -> Vec<SessionId> {
        self.index
            .get(&connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        self.member_by_connection(session_id, connection_id).is_some()
    }

    pub fn member_by_connection(
        &self,
        session_id: &str,
        connection_id: ConnectionId,
    ) -> Option<MemberEntry> {
        self.sessions.get(session_id).and_then(|entry| {
            entry
                .members
                .iter()
                .find(|m| m.connection_id == connection_id)
                .cloned()
        })
    }

    /// Append a chat line to the session's in-memory transcript.
    pub fn record_chat(&self, message: &ChatMessage) {
        if let Some(mut entry) = self.sessions.get_mut(&message.session_id) {
            entry.value_mut().transcript.push(message.clone());
        }
    }

    /// The session's chat transcript so far. Lost when the session is
    /// pruned or the hub restarts.
    pub fn transcript(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.transcript.clone())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
