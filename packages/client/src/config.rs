//! Session configuration.
//!
//! Defaults match the backend's client defaults. The binary overrides them
//! from command-line arguments.

use std::time::Duration;

use url::Url;

use crate::error::SessionError;

/// Connection lifecycle tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the hub (`ws://` or `wss://`).
    pub hub_url: String,
    /// Reconnection attempts after the initial one before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between attempts.
    pub reconnect_interval: Duration,
    /// Heartbeat interval offered in both directions.
    pub heartbeat_interval: Duration,
    /// Missed inbound heartbeat intervals tolerated before the link is
    /// considered dropped.
    pub heartbeat_tolerance: u32,
    /// Bound on opening the link plus the CONNECT/CONNECTED exchange.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8080/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(3000),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_tolerance: 2,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// Host advertised in the CONNECT frame.
    pub fn hub_host(&self) -> Result<String, SessionError> {
        let url = Url::parse(&self.hub_url)
            .map_err(|e| SessionError::Transport(format!("invalid hub url {}: {e}", self.hub_url)))?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| SessionError::Transport(format!("hub url {} has no host", self.hub_url)))
    }
}

/// Everything a [`crate::usecase::ChatSession`] needs besides its
/// collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    /// Base URL of the REST directory, e.g. `http://localhost:8080/api`.
    pub api_base_url: String,
    /// Bound on waiting for a queued subscription to be established.
    pub subscribe_wait: Duration,
    /// How long a message must stay visible before it counts as read.
    pub read_dwell: Duration,
    /// Interval of the focused room's participant presence refresh.
    pub presence_refresh: Duration,
    /// Page size of the history backfill.
    pub backfill_page_size: u32,
    /// Largest inline image accepted by `send_image`.
    pub max_image_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            api_base_url: "http://localhost:8080/api".to_string(),
            subscribe_wait: Duration::from_secs(10),
            read_dwell: Duration::from_millis(500),
            presence_refresh: Duration::from_secs(5),
            backfill_page_size: 50,
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn new(hub_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig {
                hub_url: hub_url.into(),
                ..ConnectionConfig::default()
            },
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }
}
