use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::state::AppState;
use crate::ws;
use crate::ws::protocol::RosterMember;

/// Build the hub router: the WebSocket endpoint plus a small REST
/// read surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions/{session_id}/members", get(session_members))
        .route("/ws", get(ws::handler::ws_upgrade))
        .with_state(state)
}

/// GET /api/health — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/sessions/{session_id}/members — current roster in insertion
/// order. Unknown sessions answer with an empty list.
async fn session_members(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Vec<RosterMember>> {
    let members = state
        .sessions
        .members_of(&session_id)
        .iter()
        .map(|m| RosterMember {
            client_id: m.connection_id,
            user_data: m.user.clone(),
        })
        .collect();
    Json(members)
}
