use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Peerhub realtime coordination hub
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "peerhub", version, about = "Realtime session coordination hub")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PEERHUB_PORT", default_value = "8642")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PEERHUB_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./peerhub.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PEERHUB_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Grace window in milliseconds between a transport loss and treating
    /// the participant as departed
    #[arg(long, env = "PEERHUB_GRACE_PERIOD_MS", default_value = "5000")]
    pub grace_period_ms: u64,

    /// Interval in seconds between server keepalive pings
    #[arg(long, env = "PEERHUB_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "PEERHUB_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,

    /// Fixed client reconnect backoff in milliseconds
    #[arg(long, env = "PEERHUB_RECONNECT_BACKOFF_MS", default_value = "2000")]
    pub reconnect_backoff_ms: u64,

    /// Milliseconds a client waits after transport loss before surfacing
    /// a disconnected indicator
    #[arg(long, env = "PEERHUB_RECONNECT_DEBOUNCE_MS", default_value = "400")]
    pub reconnect_debounce_ms: u64,

    /// Cap on the reconnect attempt counter shown to the user; retries
    /// continue in the background past it
    #[arg(long, env = "PEERHUB_RECONNECT_MAX_SURFACED_ATTEMPTS", default_value = "5")]
    pub reconnect_max_surfaced_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8642,
            bind_address: "0.0.0.0".to_string(),
            config: "./peerhub.toml".to_string(),
            json_logs: false,
            generate_config: false,
            grace_period_ms: 5000,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            reconnect_backoff_ms: 2000,
            reconnect_debounce_ms: 400,
            reconnect_max_surfaced_attempts: 5,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PEERHUB_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PEERHUB_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Peerhub Coordination Hub Configuration
# Place this file at ./peerhub.toml or specify with --config <path>
# All settings can be overridden via environment variables (PEERHUB_PORT, etc.)
# or CLI flags (--port, etc.)

# Hub port (default: 8642)
# port = 8642

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Liveness ----

# Grace window between transport loss and treating a participant as
# departed. Reconnecting within the window preserves session membership
# with no join/leave events. (milliseconds, default: 5000)
# grace_period_ms = 5000

# Server keepalive cadence: ping every N seconds, close the connection
# if no pong arrives within pong_timeout_secs
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Client reconnection ----

# Fixed backoff between reconnect attempts (milliseconds, default: 2000)
# reconnect_backoff_ms = 2000

# Delay before surfacing a disconnected indicator, to avoid flicker
# during normal page navigation (milliseconds, default: 400)
# reconnect_debounce_ms = 400

# Cap on the attempt counter surfaced to the user; reconnection keeps
# retrying in the background past it (default: 5)
# reconnect_max_surfaced_attempts = 5
"#
    .to_string()
}
