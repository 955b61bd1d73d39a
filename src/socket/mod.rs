//! Realtime channel to the chat server.

pub mod connection;
pub mod manager;
pub mod packet;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ChatError, Result};

pub use connection::Connection;
pub use manager::ConnectionManager;

/// Engine.IO protocol revision spoken by the client.
pub const ENGINE_IO_VERSION: &str = "4";

/// Transport and retry settings for realtime connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub reconnection: bool,
    /// `None` retries forever.
    pub reconnection_attempts: Option<u32>,
    pub reconnection_delay_ms: u64,
    pub reconnection_delay_max_ms: u64,
    /// Upper bound on the websocket + Socket.IO handshake.
    pub connect_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay_ms: 1_000,
            reconnection_delay_max_ms: 5_000,
            connect_timeout_ms: 20_000,
        }
    }
}

impl SocketConfig {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// base delay, capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .reconnection_delay_ms
            .saturating_mul(factor)
            .min(self.reconnection_delay_max_ms);
        Duration::from_millis(ms)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn may_retry(&self, attempts: u32) -> bool {
        self.reconnection && self.reconnection_attempts.is_none_or(|max| attempts < max)
    }
}

/// Websocket endpoint for `base` carrying `token` as a query parameter.
pub fn socket_url(base: &Url, token: &str) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChatError::Protocol(format!("unsupported URL scheme {other:?}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Protocol(format!("cannot switch {base} to {scheme}")))?;
    url.set_path("/socket.io/");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", ENGINE_IO_VERSION)
        .append_pair("transport", "websocket")
        .append_pair("token", token);
    Ok(url)
}
