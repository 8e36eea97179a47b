//! Connection state types and the reconnect policy.

use std::time::Duration;

use url::Url;

use crate::models::Message;

/// Connection state for the room stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Base delay; attempt k waits k times this.
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based). Linear backoff: a small
    /// bounded retry budget against a single backend does not need an
    /// exponential tail.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }
}

/// Parameters captured at `connect()` time, retained for the lifetime of the
/// logical session and reused to re-establish the stream after loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub room_id: String,
    pub username: String,
    pub user_id: Option<String>,
}

impl SessionParams {
    /// Build the join URL for this session. Room join is parameterized
    /// entirely through the URL; there is no post-connect handshake.
    pub(crate) fn join_url(&self, ws_base: &Url) -> String {
        let mut url = format!(
            "{}/join-room/{}?username={}",
            ws_base.as_str().trim_end_matches('/'),
            self.room_id,
            urlencoding::encode(&self.username),
        );
        if let Some(user_id) = &self.user_id {
            url.push_str("&client_id=");
            url.push_str(&urlencoding::encode(user_id));
        }
        url
    }
}

/// Observable snapshot of the room stream.
///
/// Replaced wholesale on every transition; consumers hold a
/// `watch::Receiver<WsState>` and only ever read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WsState {
    pub connection_state: ConnectionState,
    pub connected: bool,
    /// Messages received this session, in arrival order. Cleared only by
    /// `disconnect()` or a fresh `connect()`.
    pub messages: Vec<Message>,
    pub error: Option<String>,
}

/// Configuration for a connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL of the stream endpoint (e.g. `ws://localhost:8080`).
    pub ws_base: Url,
    pub reconnect: ReconnectConfig,
}

impl ManagerConfig {
    pub fn new(ws_base: Url) -> Self {
        Self {
            ws_base,
            reconnect: ReconnectConfig::default(),
        }
    }
}
