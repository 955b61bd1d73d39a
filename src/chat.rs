//! State behind the chat window, independent of any toolkit.

use std::sync::Arc;

use crate::api::events::{ClientRequest, ConnectionEvent, JoinRequest, ServerEvent, ack_error};
use crate::api::models::{ChatMessage, Coordinates};
use crate::error::{ChatError, Result};
use crate::socket::Connection;

pub const DEFAULT_ROOM: &str = "general";

/// What the chat window renders.
#[derive(Debug, Default)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub roster: Vec<String>,
    pub connected: bool,
    pub insights: InsightsPanel,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one connection event into the state.
    ///
    /// Returns `true` when the message list changed, so the view knows to
    /// scroll.
    pub fn apply(&mut self, event: &ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Connected => self.connected = true,
            ConnectionEvent::Disconnected(_) | ConnectionEvent::Rejected(_) => self.connected = false,
            ConnectionEvent::Server(ServerEvent::RoomHistory(history)) => {
                self.messages = history.clone();
                return true;
            }
            ConnectionEvent::Server(ServerEvent::Message(m))
            | ConnectionEvent::Server(ServerEvent::LocationMessage(m)) => {
                self.messages.push(m.clone());
                return true;
            }
            ConnectionEvent::Server(ServerEvent::RoomData(data)) => self.roster = data.usernames(),
        }
        false
    }
}

/// The insights side panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsPanel {
    pub loading: bool,
    pub text: String,
}

impl InsightsPanel {
    pub const EMPTY: &'static str = "No insights generated.";
    pub const FAILED: &'static str = "Failed to fetch AI insights.";

    pub fn begin(&mut self) {
        self.loading = true;
        self.text.clear();
    }

    /// Settle the panel. Loading always ends, whatever the outcome.
    pub fn finish(&mut self, result: Result<Option<String>>) {
        self.loading = false;
        self.text = match result {
            Ok(Some(text)) if !text.is_empty() => text,
            Ok(_) => Self::EMPTY.to_string(),
            Err(e) => {
                log::error!("insights fetch failed: {e}");
                Self::FAILED.to_string()
            }
        };
    }
}

/// Source of the device position for location sharing.
pub trait LocationProvider: Send + Sync {
    /// `None` when location is unavailable on this device.
    fn current_position(&self) -> Option<Coordinates>;
}

/// A position fixed in configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Coordinates>);

impl LocationProvider for FixedLocation {
    fn current_position(&self) -> Option<Coordinates> {
        self.0
    }
}

/// User actions against a live connection.
#[derive(Debug, Clone)]
pub struct ChatSession {
    conn: Arc<Connection>,
}

impl ChatSession {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Join `room`, as "anon" when `username` is blank.
    pub async fn join(&self, username: &str, room: &str) -> Result<()> {
        let request = ClientRequest::Join(JoinRequest::new(username, room));
        self.request(&request).await
    }

    /// Send a chat line. Blank text is not sent; returns whether it was.
    pub async fn send_message(&self, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        self.request(&ClientRequest::SendMessage(text.to_string())).await?;
        Ok(true)
    }

    /// Share the device position.
    ///
    /// Returns once the emit is queued. The server's acknowledgement is only
    /// logged, from a detached task, whenever (if ever) it arrives.
    pub fn share_location(&self, provider: &dyn LocationProvider) -> Result<()> {
        let coords = provider
            .current_position()
            .ok_or(ChatError::LocationUnavailable)?;
        let ack = self.conn.emit_acked(&ClientRequest::SendLocation(coords))?;
        self.conn.runtime().spawn(async move {
            if ack.await.is_ok() {
                log::info!("Location shared");
            }
        });
        Ok(())
    }

    async fn request(&self, request: &ClientRequest) -> Result<()> {
        let args = self.conn.emit_with_ack(request).await?;
        match ack_error(&args) {
            Some(err) => {
                log::warn!("{} rejected: {err}", request.name());
                Err(ChatError::Rejected(err))
            }
            None => Ok(()),
        }
    }
}
