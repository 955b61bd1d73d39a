//! Crate-wide error type.

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors raised by the API client, the realtime connection and local state.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local key/value store failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Config file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer sent something the packet codec does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server answered with a non-success status.
    #[error("API error ({status}): {}", message.as_deref().unwrap_or("no details"))]
    Api {
        status: u16,
        /// The `error` field of the response body, when present.
        message: Option<String>,
    },

    /// Server refused an action (ack error or connect error).
    #[error("{0}")]
    Rejected(String),

    /// The connection task is gone.
    #[error("not connected")]
    NotConnected,

    /// The transport closed before the server acknowledged.
    #[error("acknowledgement dropped")]
    AckDropped,

    #[error("no auth token stored")]
    MissingToken,

    #[error("Location not supported")]
    LocationUnavailable,
}

impl ChatError {
    /// Message to show the user for a failed auth form submission.
    ///
    /// Server-provided `error` text wins; anything else collapses to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ChatError::Api { message: Some(m), .. } if !m.is_empty() => m.clone(),
            _ => fallback.to_string(),
        }
    }
}
