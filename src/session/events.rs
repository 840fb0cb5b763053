//! Session event handlers: join, leave, chat, whiteboard.
//!
//! These are the mutation paths for the membership tracker. Fan-out
//! recipient sets are resolved against the tracker at dispatch time.

use chrono::Utc;
use uuid::Uuid;

use crate::registry::{ConnectionId, UserSnapshot};
use crate::session::tracker::ChatMessage;
use crate::state::AppState;
use crate::ws::broadcast::{broadcast_to_members, send_to_connection};
use crate::ws::protocol::{
    ChatSendPayload, JoinPayload, LeavePayload, RosterMember, ServerEvent, WhiteboardSendPayload,
};

/// Error code for events referencing a session the sender hasn't joined.
const CODE_NOT_A_MEMBER: u16 = 403;

/// Handle a join: associate the user with the connection, add the
/// membership entry, reply with the current roster, and notify the other
/// members.
///
/// If the same user reconnected within the grace window, the pending
/// departure is cancelled and the membership entry silently taken over —
/// no join/leave pair reaches the other members.
pub fn handle_join(state: &AppState, connection_id: ConnectionId, payload: JoinPayload) {
    let JoinPayload {
        session_id,
        user_id,
        name,
        avatar,
    } = payload;

    // Payload metadata wins; fall back to whatever identity the
    // connection already carries for this user.
    let carried = state
        .registry
        .lookup(connection_id)
        .and_then(|conn| conn.user)
        .filter(|user| user.id == user_id);
    let snapshot = UserSnapshot {
        name: name
            .or_else(|| carried.as_ref().map(|u| u.name.clone()))
            .unwrap_or_else(|| user_id.clone()),
        avatar: avatar.or_else(|| carried.as_ref().and_then(|u| u.avatar.clone())),
        id: user_id,
    };

    state.registry.associate_user(connection_id, snapshot.clone());

    let reclaimed = state
        .liveness
        .cancel_pending(&state.registry, &snapshot.id, &session_id)
        .is_some();

    let outcome = state
        .sessions
        .join(&session_id, connection_id, snapshot.clone());

    // Roster reply to the joiner: who's here, in insertion order.
    let members = state.sessions.members_of(&session_id);
    let roster = ServerEvent::SessionRoster {
        session_id: session_id.clone(),
        members: members
            .iter()
            .map(|m| RosterMember {
                client_id: m.connection_id,
                user_data: m.user.clone(),
            })
            .collect(),
    };
    send_to_connection(&state.registry, connection_id, &roster);

    if outcome.resumed || reclaimed {
        tracing::debug!(
            connection_id = %connection_id,
            session_id = %session_id,
            user_id = %snapshot.id,
            "membership resumed, join notice suppressed"
        );
        return;
    }

    tracing::info!(
        connection_id = %connection_id,
        session_id = %session_id,
        user_id = %snapshot.id,
        "user joined session"
    );

    let event = ServerEvent::UserJoined {
        session_id,
        user_data: snapshot,
    };
    broadcast_to_members(&state.registry, &outcome.existing, None, &event);
}

/// Handle a leave: remove the entry and notify the remaining members.
/// The sender is already removed before the broadcast, so it is
/// naturally excluded.
pub fn handle_leave(state: &AppState, connection_id: ConnectionId, payload: LeavePayload) {
    match state.sessions.leave(&payload.session_id, connection_id) {
        Some(entry) => {
            tracing::info!(
                connection_id = %connection_id,
                session_id = %payload.session_id,
                user_id = %entry.user.id,
                "user left session"
            );
            let remaining = state.sessions.members_of(&payload.session_id);
            let event = ServerEvent::UserLeft {
                session_id: payload.session_id,
                user_id: entry.user.id,
            };
            broadcast_to_members(&state.registry, &remaining, None, &event);
        }
        None => {
            tracing::debug!(
                connection_id = %connection_id,
                session_id = %payload.session_id,
                "leave without membership ignored"
            );
        }
    }
}

/// Handle a chat message: membership is required, the hub stamps the
/// timestamp and sender snapshot, and the broadcast includes the sender
/// so its UI reflects the authoritative copy.
pub fn handle_chat(state: &AppState, connection_id: ConnectionId, payload: ChatSendPayload) {
    let Some(member) = state
        .sessions
        .member_by_connection(&payload.session_id, connection_id)
    else {
        tracing::warn!(
            connection_id = %connection_id,
            session_id = %payload.session_id,
            "chat from non-member rejected"
        );
        send_to_connection(
            &state.registry,
            connection_id,
            &ServerEvent::Error {
                code: CODE_NOT_A_MEMBER,
                message: format!("not a member of session {}", payload.session_id),
            },
        );
        return;
    };

    let message = ChatMessage {
        id: Uuid::now_v7(),
        session_id: payload.session_id,
        user: member.user,
        message: payload.message,
        timestamp: Utc::now().timestamp_millis(),
    };
    state.sessions.record_chat(&message);

    let members = state.sessions.members_of(&message.session_id);
    let event = ServerEvent::ChatMessage {
        session_id: message.session_id.clone(),
        id: message.id,
        user_data: message.user.clone(),
        message: message.message.clone(),
        timestamp: message.timestamp,
    };
    broadcast_to_members(&state.registry, &members, None, &event);
}

/// Handle a whiteboard update: relay the payload verbatim to all other
/// members. The sender already has the authoritative local state, so it
/// is excluded. Last update wins; no ordering guarantee beyond wire
/// arrival order.
pub fn handle_whiteboard(
    state: &AppState,
    connection_id: ConnectionId,
    payload: WhiteboardSendPayload,
) {
    if !state.sessions.is_member(&payload.session_id, connection_id) {
        tracing::debug!(
            connection_id = %connection_id,
            session_id = %payload.session_id,
            "whiteboard update from non-member dropped"
        );
        return;
    }

    let members = state.sessions.members_of(&payload.session_id);
    let event = ServerEvent::WhiteboardUpdate {
        session_id: payload.session_id,
        whiteboard_data: payload.whiteboard_data,
    };
    broadcast_to_members(&state.registry, &members, Some(connection_id), &event);
}
