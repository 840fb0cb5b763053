use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::registry::UserSnapshot;
use crate::state::AppState;
use crate::ws::actor;

/// Identity assertion carried on the upgrade query. The identity
/// collaborator upstream of the hub vouches for these values; a missing
/// `user` leaves the connection anonymous until its first join.
#[derive(Debug, Deserialize)]
pub struct WsIdentityQuery {
    pub user: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// GET /ws?user=<id>&name=<display>&avatar=<url>
/// WebSocket upgrade endpoint. Spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsIdentityQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let WsIdentityQuery { user, name, avatar } = params;
    let identity = user.map(|id| {
        let name = name.unwrap_or_else(|| id.clone());
        UserSnapshot { id, name, avatar }
    });

    ws.on_upgrade(move |socket| handle_upgraded(socket, state, identity))
}

async fn handle_upgraded(socket: WebSocket, state: AppState, identity: Option<UserSnapshot>) {
    actor::run_connection(socket, state, identity).await;
}
