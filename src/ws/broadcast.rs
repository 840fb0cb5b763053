//! Fan-out helpers. Sends are fire-and-forget: a failed send to one
//! recipient never aborts delivery to the rest, and never blocks the
//! processing of the next inbound event.

use axum::extract::ws::Message;

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::session::tracker::MemberEntry;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionSender;

/// Encode and send a single event down a connection's channel.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    let Ok(json) = serde_json::to_string(event) else {
        return;
    };
    let _ = tx.send(Message::Text(json.into()));
}

/// Send an event to one connection, looked up in the registry.
pub fn send_to_connection(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    event: &ServerEvent,
) {
    match registry.sender(connection_id) {
        Some(tx) => send_event(&tx, event),
        None => {
            tracing::debug!(connection_id = %connection_id, "send to unknown connection dropped");
        }
    }
}

/// Deliver one event to a session's member set, encoding once. Pass the
/// sender's connection id as `exclude` for the "all others" fan-outs.
pub fn broadcast_to_members(
    registry: &ConnectionRegistry,
    members: &[MemberEntry],
    exclude: Option<ConnectionId>,
    event: &ServerEvent,
) {
    let Ok(json) = serde_json::to_string(event) else {
        return;
    };
    let msg = Message::Text(json.into());

    for member in members {
        if Some(member.connection_id) == exclude {
            continue;
        }
        if let Some(tx) = registry.sender(member.connection_id) {
            let _ = tx.send(msg.clone());
        }
    }
}
