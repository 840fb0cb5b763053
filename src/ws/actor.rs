use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::registry::UserSnapshot;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol::{self, ServerEvent};

/// Run the actor-per-connection pattern for an accepted WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send messages to this client
/// by cloning the sender.
///
/// On transport loss the connection is handed to the liveness supervisor
/// rather than pruned: membership survives the grace window so a quick
/// reconnect produces no join/leave churn.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    identity: Option<UserSnapshot>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let connection_id = state.registry.register(tx.clone());
    if let Some(user) = identity {
        state.registry.associate_user(connection_id, user);
    }

    // Ack first: the assigned client id is what peers address signals to.
    broadcast::send_event(&tx, &ServerEvent::ConnectionAck { client_id: connection_id });
    state.registry.mark_open(connection_id);

    tracing::info!(connection_id = %connection_id, "connection actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_interval = state.ping_interval;
    let pong_timeout = state.pong_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        "pong timeout, closing connection"
                    );
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &state, connection_id);
                }
                Message::Binary(_) => {
                    // The envelope protocol is JSON text
                    tracing::debug!(
                        connection_id = %connection_id,
                        "binary frame ignored (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Hand the connection to the liveness supervisor: membership is only
    // pruned once the grace window expires unreclaimed.
    state
        .liveness
        .connection_lost(&state.registry, &state.sessions, connection_id);

    tracing::info!(connection_id = %connection_id, "connection actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
