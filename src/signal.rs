//! Signaling relay: pure pass-through of negotiation payloads between
//! peers in a session.
//!
//! The hub never inspects the signal body. Targets are resolved against
//! the session's member set at delivery time, so a peer that left
//! between send and delivery is silently skipped.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::session::tracker::SessionTracker;
use crate::ws::broadcast::{broadcast_to_members, send_to_connection};
use crate::ws::protocol::{ServerEvent, VideoSignalPayload};

/// Destination selector for a signal: every other current member, or one
/// specific peer addressed by its connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSelector {
    All,
    Peer(ConnectionId),
}

impl Serialize for TargetSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TargetSelector::All => serializer.serialize_str("all"),
            TargetSelector::Peer(id) => serializer.collect_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for TargetSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "all" {
            return Ok(TargetSelector::All);
        }
        Uuid::parse_str(&raw)
            .map(TargetSelector::Peer)
            .map_err(|_| D::Error::custom("target must be \"all\" or a client id"))
    }
}

/// Relay one signal. Delivery is best-effort and unacknowledged;
/// renegotiation on loss is the peers' concern, not the relay's.
pub fn relay(
    registry: &ConnectionRegistry,
    tracker: &SessionTracker,
    from: ConnectionId,
    payload: VideoSignalPayload,
) {
    let VideoSignalPayload {
        session_id,
        target,
        signal,
    } = payload;

    // Resolved now, not at send time: membership may have changed.
    let members = tracker.members_of(&session_id);
    let event = ServerEvent::VideoSignal {
        session_id: session_id.clone(),
        from_client_id: from,
        signal,
    };

    match target {
        TargetSelector::All => {
            broadcast_to_members(registry, &members, Some(from), &event);
        }
        TargetSelector::Peer(peer) => {
            if members.iter().any(|m| m.connection_id == peer) {
                send_to_connection(registry, peer, &event);
            } else {
                tracing::debug!(
                    session_id = %session_id,
                    target = %peer,
                    "signal target no longer in session, dropped"
                );
            }
        }
    }
}
