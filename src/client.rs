//! Reconnecting hub client: the client half of the liveness design.
//!
//! Keeps one connection to the hub alive across transport loss. A short
//! debounce hides blips from the status indicator (no flicker during
//! normal page navigation); reconnection then retries with a fixed
//! backoff, forever — only the attempt counter surfaced to the user is
//! capped.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::Config;
use crate::ws::protocol::{ClientEvent, ServerEvent};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full hub URL, e.g. `ws://host:8642/ws?user=u1&name=Ada`
    pub url: String,
    /// Fixed delay between reconnect attempts
    pub backoff: Duration,
    /// Delay before surfacing a disconnected indicator
    pub debounce: Duration,
    /// Cap on the attempt counter shown to the user; retries continue
    /// past it
    pub max_surfaced_attempts: u32,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: Duration::from_millis(2000),
            debounce: Duration::from_millis(400),
            max_surfaced_attempts: 5,
        }
    }

    /// Take the reconnect schedule from hub configuration.
    pub fn from_hub_config(url: impl Into<String>, config: &Config) -> Self {
        Self {
            url: url.into(),
            backoff: Duration::from_millis(config.reconnect_backoff_ms),
            debounce: Duration::from_millis(config.reconnect_debounce_ms),
            max_surfaced_attempts: config.reconnect_max_surfaced_attempts,
        }
    }
}

/// Connection liveness as surfaced to the end user. Protocol-level
/// failures are not represented here; they arrive as `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { surfaced_attempt: u32 },
}

/// Handle to a running hub connection.
pub struct HubClient {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl HubClient {
    /// Spawn the connection task. Returns immediately; the first
    /// successful connect flips the status to `Connected`.
    pub fn connect(config: ClientConfig) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let task = tokio::spawn(run_client(config, out_rx, evt_tx, status_tx));

        Self {
            outbound: out_tx,
            events: evt_rx,
            status: status_rx,
            task,
        }
    }

    /// Queue an event for the hub. Returns false once the client has
    /// shut down.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.outbound.send(event).is_ok()
    }

    /// Next event from the hub, across reconnects.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch handle for status transitions.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_client(
    config: ClientConfig,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<ServerEvent>,
    status: watch::Sender<ConnectionStatus>,
) {
    let mut attempt: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                let _ = status.send(ConnectionStatus::Connected);
                tracing::info!(url = %config.url, "hub connection established");

                let (mut write, mut read) = stream.split();
                let shutting_down = loop {
                    tokio::select! {
                        inbound = read.next() => match inbound {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                    Ok(event) => {
                                        if events.send(event).is_err() {
                                            break true;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(error = %e, "undecodable frame from hub dropped");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Ping(data))) => {
                                let _ = write.send(WsMessage::Pong(data)).await;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break false,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "hub connection error");
                                break false;
                            }
                        },
                        queued = outbound.recv() => match queued {
                            Some(event) => {
                                let Ok(json) = serde_json::to_string(&event) else {
                                    continue;
                                };
                                if write.send(WsMessage::Text(json.into())).await.is_err() {
                                    break false;
                                }
                            }
                            // Handle dropped — shut the task down
                            None => break true,
                        },
                    }
                };
                if shutting_down {
                    return;
                }

                // Transport lost: debounce before surfacing the indicator,
                // to hide blips during normal page navigation.
                tokio::time::sleep(config.debounce).await;
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "hub connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let surfaced_attempt = attempt.min(config.max_surfaced_attempts);
        let _ = status.send(ConnectionStatus::Reconnecting { surfaced_attempt });
        tokio::time::sleep(config.backoff).await;
    }
}
