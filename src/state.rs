use std::time::Duration;

use crate::config::Config;
use crate::liveness::LivenessSupervisor;
use crate::registry::ConnectionRegistry;
use crate::session::tracker::SessionTracker;

/// Shared application state passed to all handlers via axum State extractor.
///
/// One `AppState` is one independent hub instance: tests build as many
/// as they need and each tears down cleanly.
#[derive(Clone)]
pub struct AppState {
    /// Live connections and their identities
    pub registry: ConnectionRegistry,
    /// Session membership and in-memory transcripts
    pub sessions: SessionTracker,
    /// Grace-window supervision for dropped transports
    pub liveness: LivenessSupervisor,
    /// Keepalive cadence for connection actors
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            sessions: SessionTracker::new(),
            liveness: LivenessSupervisor::new(Duration::from_millis(config.grace_period_ms)),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
        }
    }
}
