//! Integration tests for the coordination hub: connection ack, session
//! join/leave fan-out, chat, whiteboard relay, signaling, and the
//! grace-window reconnection semantics.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use peerhub::config::Config;
use peerhub::routes;
use peerhub::signal::TargetSelector;
use peerhub::state::AppState;
use peerhub::ws::protocol::{
    ChatSendPayload, ClientEvent, JoinPayload, LeavePayload, ServerEvent, VideoSignalPayload,
    WhiteboardSendPayload,
};

type WsWrite = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Start a hub on a random port with the given grace window.
async fn start_hub(grace_ms: u64) -> (SocketAddr, AppState) {
    let config = Config {
        grace_period_ms: grace_ms,
        ..Config::default()
    };
    let state = AppState::new(&config);
    let app = routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Connect as a user and consume the connection-ack.
async fn connect_user(addr: SocketAddr, user: &str, name: &str) -> (WsWrite, WsRead, Uuid) {
    let url = format!("ws://{}/ws?user={}&name={}", addr, user, name);
    let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("Failed to connect to hub");
    let (write, mut read) = stream.split();

    let ack = recv_event(&mut read).await.expect("Expected connection-ack");
    let client_id = match ack {
        ServerEvent::ConnectionAck { client_id } => client_id,
        other => panic!("Expected connection-ack first, got: {:?}", other),
    };

    (write, read, client_id)
}

/// Read the next decodable server event, skipping keepalive frames.
async fn recv_event(read: &mut WsRead) -> Option<ServerEvent> {
    loop {
        let msg = timeout(Duration::from_secs(2), read.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

/// Assert no event arrives within the window.
async fn expect_silence(read: &mut WsRead, window: Duration) {
    let result = timeout(window, read.next()).await;
    assert!(result.is_err(), "Expected silence, got: {:?}", result);
}

async fn send(write: &mut WsWrite, event: &ClientEvent) {
    let json = serde_json::to_string(event).unwrap();
    write
        .send(Message::Text(json.into()))
        .await
        .expect("Failed to send event");
}

fn join_event(session_id: &str, user_id: &str) -> ClientEvent {
    ClientEvent::Join(JoinPayload {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        name: None,
        avatar: None,
    })
}

fn chat_event(session_id: &str, message: &str) -> ClientEvent {
    ClientEvent::ChatMessage(ChatSendPayload {
        session_id: session_id.to_string(),
        message: message.to_string(),
    })
}

/// Join a session and return the roster reply.
async fn join_session(
    write: &mut WsWrite,
    read: &mut WsRead,
    session_id: &str,
    user_id: &str,
) -> Vec<String> {
    send(write, &join_event(session_id, user_id)).await;
    match recv_event(read).await {
        Some(ServerEvent::SessionRoster { members, .. }) => {
            members.into_iter().map(|m| m.user_data.id).collect()
        }
        other => panic!("Expected session-roster, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _state) = start_hub(5000).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_connection_ack_is_first_frame() {
    let (addr, state) = start_hub(5000).await;
    let (_write, _read, client_id) = connect_user(addr, "u1", "Ada").await;

    // The assigned id is registered server-side
    assert!(state.registry.lookup(client_id).is_some());
}

#[tokio::test]
async fn test_join_roster_and_notification() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, _a_id) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b_id) = connect_user(addr, "ub", "Grace").await;

    let roster = join_session(&mut a_write, &mut a_read, "42", "ua").await;
    assert_eq!(roster, vec!["ua"]);

    let roster = join_session(&mut b_write, &mut b_read, "42", "ub").await;
    assert_eq!(roster, vec!["ua", "ub"], "roster keeps insertion order");

    // A is told about B; B gets no echo of its own join
    match recv_event(&mut a_read).await {
        Some(ServerEvent::UserJoined {
            session_id,
            user_data,
        }) => {
            assert_eq!(session_id, "42");
            assert_eq!(user_data.id, "ub");
            assert_eq!(user_data.name, "Grace");
        }
        other => panic!("Expected user-joined, got: {:?}", other),
    }
    expect_silence(&mut b_read, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_chat_broadcast_includes_sender() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, _a_id) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b_id) = connect_user(addr, "ub", "Grace").await;

    join_session(&mut a_write, &mut a_read, "42", "ua").await;
    join_session(&mut b_write, &mut b_read, "42", "ub").await;
    // Drain A's user-joined notice for B
    recv_event(&mut a_read).await;

    send(&mut a_write, &chat_event("42", "hello")).await;

    for read in [&mut a_read, &mut b_read] {
        match recv_event(read).await {
            Some(ServerEvent::ChatMessage {
                session_id,
                user_data,
                message,
                timestamp,
                ..
            }) => {
                assert_eq!(session_id, "42");
                assert_eq!(user_data.id, "ua");
                assert_eq!(message, "hello");
                assert!(timestamp > 0, "server stamps the timestamp");
            }
            other => panic!("Expected chat-message, got: {:?}", other),
        }
    }

    // B leaves; a second message reaches A only
    send(
        &mut b_write,
        &ClientEvent::Leave(LeavePayload {
            session_id: "42".to_string(),
        }),
    )
    .await;
    match recv_event(&mut a_read).await {
        Some(ServerEvent::UserLeft { user_id, .. }) => assert_eq!(user_id, "ub"),
        other => panic!("Expected user-left, got: {:?}", other),
    }

    send(&mut a_write, &chat_event("42", "anyone here?")).await;
    match recv_event(&mut a_read).await {
        Some(ServerEvent::ChatMessage { message, .. }) => assert_eq!(message, "anyone here?"),
        other => panic!("Expected chat-message, got: {:?}", other),
    }
    expect_silence(&mut b_read, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_chat_from_non_member_rejected() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, _a_id) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b_id) = connect_user(addr, "ub", "Grace").await;

    join_session(&mut b_write, &mut b_read, "42", "ub").await;

    // A never joined session 42
    send(&mut a_write, &chat_event("42", "let me in")).await;

    match recv_event(&mut a_read).await {
        Some(ServerEvent::Error { code, message }) => {
            assert_eq!(code, 403);
            assert!(message.contains("42"));
        }
        other => panic!("Expected error reply, got: {:?}", other),
    }
    // No broadcast reached the member
    expect_silence(&mut b_read, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_whiteboard_update_excludes_sender() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, _a) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b) = connect_user(addr, "ub", "Grace").await;
    let (mut c_write, mut c_read, _c) = connect_user(addr, "uc", "Edsger").await;

    join_session(&mut a_write, &mut a_read, "9", "ua").await;
    join_session(&mut b_write, &mut b_read, "9", "ub").await;
    join_session(&mut c_write, &mut c_read, "9", "uc").await;
    // Drain join notices
    recv_event(&mut a_read).await;
    recv_event(&mut a_read).await;
    recv_event(&mut b_read).await;

    let strokes = json!({"strokes": [[0, 0], [10, 12]], "color": "#1a2b3c"});
    send(
        &mut a_write,
        &ClientEvent::WhiteboardUpdate(WhiteboardSendPayload {
            session_id: "9".to_string(),
            whiteboard_data: strokes.clone(),
        }),
    )
    .await;

    for read in [&mut b_read, &mut c_read] {
        match recv_event(read).await {
            Some(ServerEvent::WhiteboardUpdate {
                session_id,
                whiteboard_data,
            }) => {
                assert_eq!(session_id, "9");
                assert_eq!(whiteboard_data, strokes, "payload relayed verbatim");
            }
            other => panic!("Expected whiteboard-update, got: {:?}", other),
        }
    }
    expect_silence(&mut a_read, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_video_signal_to_all_excludes_sender() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, a_id) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b) = connect_user(addr, "ub", "Grace").await;
    let (mut c_write, mut c_read, _c) = connect_user(addr, "uc", "Edsger").await;

    join_session(&mut a_write, &mut a_read, "7", "ua").await;
    join_session(&mut b_write, &mut b_read, "7", "ub").await;
    join_session(&mut c_write, &mut c_read, "7", "uc").await;
    recv_event(&mut a_read).await;
    recv_event(&mut a_read).await;
    recv_event(&mut b_read).await;

    send(
        &mut a_write,
        &ClientEvent::VideoSignal(VideoSignalPayload {
            session_id: "7".to_string(),
            target: TargetSelector::All,
            signal: json!({"type": "offer", "sdp": "v=0..."}),
        }),
    )
    .await;

    for read in [&mut b_read, &mut c_read] {
        match recv_event(read).await {
            Some(ServerEvent::VideoSignal { from_client_id, .. }) => {
                assert_eq!(from_client_id, a_id);
            }
            other => panic!("Expected video-signal, got: {:?}", other),
        }
    }
    // Exactly one each, none for the sender
    expect_silence(&mut a_read, Duration::from_millis(300)).await;
    expect_silence(&mut b_read, Duration::from_millis(100)).await;
    expect_silence(&mut c_read, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_video_signal_to_specific_peer() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, a_id) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, b_id) = connect_user(addr, "ub", "Grace").await;
    let (mut c_write, mut c_read, c_id) = connect_user(addr, "uc", "Edsger").await;

    join_session(&mut a_write, &mut a_read, "7", "ua").await;
    join_session(&mut b_write, &mut b_read, "7", "ub").await;
    join_session(&mut c_write, &mut c_read, "7", "uc").await;
    recv_event(&mut a_read).await;
    recv_event(&mut a_read).await;
    recv_event(&mut b_read).await;

    send(
        &mut a_write,
        &ClientEvent::VideoSignal(VideoSignalPayload {
            session_id: "7".to_string(),
            target: TargetSelector::Peer(b_id),
            signal: json!({"candidate": "a=candidate:1"}),
        }),
    )
    .await;

    match recv_event(&mut b_read).await {
        Some(ServerEvent::VideoSignal { from_client_id, .. }) => assert_eq!(from_client_id, a_id),
        other => panic!("Expected video-signal, got: {:?}", other),
    }
    expect_silence(&mut c_read, Duration::from_millis(300)).await;

    // C leaves; signaling C's stale id is dropped without error
    send(
        &mut c_write,
        &ClientEvent::Leave(LeavePayload {
            session_id: "7".to_string(),
        }),
    )
    .await;
    recv_event(&mut a_read).await; // user-left
    recv_event(&mut b_read).await;

    send(
        &mut a_write,
        &ClientEvent::VideoSignal(VideoSignalPayload {
            session_id: "7".to_string(),
            target: TargetSelector::Peer(c_id),
            signal: json!({"candidate": "late"}),
        }),
    )
    .await;
    expect_silence(&mut b_read, Duration::from_millis(300)).await;

    // The sender's connection is still usable afterwards
    send(&mut a_write, &chat_event("7", "still here")).await;
    match recv_event(&mut a_read).await {
        Some(ServerEvent::ChatMessage { message, .. }) => assert_eq!(message, "still here"),
        other => panic!("Expected chat-message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_envelope_type_does_not_kill_connection() {
    let (addr, _state) = start_hub(5000).await;
    let (mut a_write, mut a_read, _a) = connect_user(addr, "ua", "Ada").await;

    join_session(&mut a_write, &mut a_read, "42", "ua").await;

    a_write
        .send(Message::Text(
            r#"{"type":"frobnicate","payload":{"x":1}}"#.into(),
        ))
        .await
        .unwrap();
    a_write
        .send(Message::Text("not even json".into()))
        .await
        .unwrap();

    // Connection survives and keeps working
    send(&mut a_write, &chat_event("42", "unscathed")).await;
    match recv_event(&mut a_read).await {
        Some(ServerEvent::ChatMessage { message, .. }) => assert_eq!(message, "unscathed"),
        other => panic!("Expected chat-message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_within_grace_window_is_silent() {
    let (addr, _state) = start_hub(1200).await;
    let (mut a_write, mut a_read, _a) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b) = connect_user(addr, "ub", "Grace").await;

    join_session(&mut a_write, &mut a_read, "5", "ua").await;
    join_session(&mut b_write, &mut b_read, "5", "ub").await;
    recv_event(&mut a_read).await; // user-joined ub

    // B's transport drops
    drop(b_write);
    drop(b_read);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // B reconnects and reclaims the session within the window
    let (mut b2_write, mut b2_read, _b2) = connect_user(addr, "ub", "Grace").await;
    let roster = join_session(&mut b2_write, &mut b2_read, "5", "ub").await;
    assert_eq!(roster, vec!["ua", "ub"]);

    // No user-left / user-joined pair ever reaches A
    expect_silence(&mut a_read, Duration::from_millis(1800)).await;

    // Membership stayed continuously live
    let members: serde_json::Value =
        reqwest::get(format!("http://{}/api/sessions/5/members", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(members.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_grace_expiry_emits_exactly_one_user_left() {
    let (addr, _state) = start_hub(300).await;
    let (mut a_write, mut a_read, _a) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b) = connect_user(addr, "ub", "Grace").await;

    join_session(&mut a_write, &mut a_read, "5", "ua").await;
    join_session(&mut b_write, &mut b_read, "5", "ub").await;
    recv_event(&mut a_read).await; // user-joined ub

    drop(b_write);
    drop(b_read);

    match recv_event(&mut a_read).await {
        Some(ServerEvent::UserLeft {
            session_id,
            user_id,
        }) => {
            assert_eq!(session_id, "5");
            assert_eq!(user_id, "ub");
        }
        other => panic!("Expected user-left after grace expiry, got: {:?}", other),
    }
    // Exactly one
    expect_silence(&mut a_read, Duration::from_millis(500)).await;

    let members: serde_json::Value =
        reqwest::get(format!("http://{}/api/sessions/5/members", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(members.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_grace_expiry_fans_out_across_sessions() {
    let (addr, _state) = start_hub(300).await;
    let (mut a_write, mut a_read, _a) = connect_user(addr, "ua", "Ada").await;
    let (mut b_write, mut b_read, _b) = connect_user(addr, "ub", "Grace").await;

    join_session(&mut a_write, &mut a_read, "s1", "ua").await;
    join_session(&mut a_write, &mut a_read, "s2", "ua").await;
    join_session(&mut b_write, &mut b_read, "s1", "ub").await;
    join_session(&mut b_write, &mut b_read, "s2", "ub").await;
    recv_event(&mut a_read).await; // user-joined ub (s1)
    recv_event(&mut a_read).await; // user-joined ub (s2)

    drop(b_write);
    drop(b_read);

    // A hears the departure once per shared session
    let mut seen = Vec::new();
    for _ in 0..2 {
        match recv_event(&mut a_read).await {
            Some(ServerEvent::UserLeft {
                session_id,
                user_id,
            }) => {
                assert_eq!(user_id, "ub");
                seen.push(session_id);
            }
            other => panic!("Expected user-left, got: {:?}", other),
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["s1".to_string(), "s2".to_string()]);
    expect_silence(&mut a_read, Duration::from_millis(400)).await;
}
