//! Wire envelopes and the inbound dispatch table.
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}`. Payload
//! shape is fully determined by the type tag; frames with unrecognized
//! tags or malformed payloads are logged and dropped without terminating
//! the connection. Sender identity is always taken from the connection
//! registry, never from the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::{ConnectionId, UserSnapshot};
use crate::session::events;
use crate::signal::{self, TargetSelector};
use crate::state::AppState;

/// Inbound envelopes, tagged by event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join(JoinPayload),
    Leave(LeavePayload),
    ChatMessage(ChatSendPayload),
    WhiteboardUpdate(WhiteboardSendPayload),
    VideoSignal(VideoSignalPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub session_id: String,
    pub user_id: String,
    /// Display metadata; falls back to what the connection already carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendPayload {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardSendPayload {
    pub session_id: String,
    /// Opaque to the hub; relayed verbatim.
    pub whiteboard_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSignalPayload {
    pub session_id: String,
    pub target: TargetSelector,
    /// Opaque negotiation body; never parsed or validated.
    pub signal: Value,
}

/// Outbound envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    ConnectionAck { client_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    SessionRoster {
        session_id: String,
        members: Vec<RosterMember>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        session_id: String,
        user_data: UserSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft { session_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        session_id: String,
        id: Uuid,
        user_data: UserSnapshot,
        message: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    WhiteboardUpdate {
        session_id: String,
        whiteboard_data: Value,
    },
    #[serde(rename_all = "camelCase")]
    VideoSignal {
        session_id: String,
        from_client_id: ConnectionId,
        signal: Value,
    },
    Error { code: u16, message: String },
}

/// One entry of a `session-roster` payload. The client id is what peers
/// address video signals to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    pub client_id: ConnectionId,
    pub user_data: UserSnapshot,
}

/// Single entry point for inbound traffic: decode the envelope and
/// dispatch by type. All handling is in-memory and runs to completion —
/// no suspension points between decode and fan-out.
pub fn handle_text_frame(text: &str, state: &AppState, connection_id: ConnectionId) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            // Unknown tags and malformed payloads both land here: drop,
            // log, keep the connection open.
            tracing::debug!(
                connection_id = %connection_id,
                error = %e,
                "undecodable envelope dropped"
            );
            return;
        }
    };

    match event {
        ClientEvent::Join(payload) => events::handle_join(state, connection_id, payload),
        ClientEvent::Leave(payload) => events::handle_leave(state, connection_id, payload),
        ClientEvent::ChatMessage(payload) => events::handle_chat(state, connection_id, payload),
        ClientEvent::WhiteboardUpdate(payload) => {
            events::handle_whiteboard(state, connection_id, payload)
        }
        ClientEvent::VideoSignal(payload) => {
            signal::relay(&state.registry, &state.sessions, connection_id, payload)
        }
    }
}
