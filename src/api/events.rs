//! Named events exchanged with the chat server over the realtime channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::models::{ChatMessage, Coordinates, RoomData};
use crate::error::{ChatError, Result};

/// Server → client events the chat view understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Full message history for the joined room.
    RoomHistory(Vec<ChatMessage>),
    Message(ChatMessage),
    LocationMessage(ChatMessage),
    /// Membership snapshot.
    RoomData(RoomData),
}

impl ServerEvent {
    pub const ROOM_HISTORY: &'static str = "roomHistory";
    pub const MESSAGE: &'static str = "message";
    // Lowercase on the wire, unlike its siblings.
    pub const LOCATION_MESSAGE: &'static str = "locationmessage";
    pub const ROOM_DATA: &'static str = "roomData";

    /// Decode an inbound event from its name and first argument.
    ///
    /// Returns `Ok(None)` for event names this client does not handle.
    pub fn decode(name: &str, payload: Option<&Value>) -> Result<Option<Self>> {
        let payload = payload.unwrap_or(&Value::Null);
        let event = match name {
            Self::ROOM_HISTORY => {
                let items = payload.as_array().ok_or_else(|| {
                    ChatError::Protocol(format!("{name}: expected an array, got {payload}"))
                })?;
                ServerEvent::RoomHistory(items.iter().map(ChatMessage::from_wire).collect())
            }
            Self::MESSAGE => ServerEvent::Message(Self::message(name, payload)?),
            Self::LOCATION_MESSAGE => ServerEvent::LocationMessage(Self::message(name, payload)?),
            Self::ROOM_DATA => ServerEvent::RoomData(serde_json::from_value(payload.clone())?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn message(name: &str, payload: &Value) -> Result<ChatMessage> {
        if !payload.is_object() {
            return Err(ChatError::Protocol(format!("{name}: expected an object, got {payload}")));
        }
        Ok(ChatMessage::from_wire(payload))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomHistory(_) => Self::ROOM_HISTORY,
            ServerEvent::Message(_) => Self::MESSAGE,
            ServerEvent::LocationMessage(_) => Self::LOCATION_MESSAGE,
            ServerEvent::RoomData(_) => Self::ROOM_DATA,
        }
    }
}

/// Payload of a `join` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub username: String,
    pub room: String,
}

impl JoinRequest {
    pub const ANONYMOUS: &'static str = "anon";

    /// A blank username joins as [`Self::ANONYMOUS`].
    pub fn new(username: &str, room: &str) -> Self {
        let username = if username.trim().is_empty() { Self::ANONYMOUS } else { username };
        Self {
            username: username.to_string(),
            room: room.to_string(),
        }
    }
}

/// Client → server requests. Every request is acknowledged by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Join(JoinRequest),
    SendMessage(String),
    SendLocation(Coordinates),
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Join(_) => "join",
            ClientRequest::SendMessage(_) => "SendMessage",
            ClientRequest::SendLocation(_) => "SendLocation",
        }
    }

    pub fn payload(&self) -> Result<Value> {
        Ok(match self {
            ClientRequest::Join(req) => serde_json::to_value(req)?,
            ClientRequest::SendMessage(text) => Value::String(text.clone()),
            ClientRequest::SendLocation(coords) => serde_json::to_value(coords)?,
        })
    }
}

/// What a [`crate::socket::Connection`] reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake completed (also after every reconnect).
    Connected,
    /// Transport lost or closed, with a short reason.
    Disconnected(String),
    /// Server refused the connection; no reconnect follows.
    Rejected(String),
    Server(ServerEvent),
}

/// Interpret acknowledgement arguments as an optional server error.
///
/// The first argument counts as an error when it is truthy: not null, false,
/// zero or the empty string. Strings are returned as-is, other values as JSON.
pub fn ack_error(args: &[Value]) -> Option<String> {
    match args.first()? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
