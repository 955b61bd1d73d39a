use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a message was created, as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Already formatted by the server; shown verbatim.
    Formatted(String),
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
}

impl Timestamp {
    /// Text for the message header. Epochs render as local time of day.
    pub fn display(&self) -> String {
        match self {
            Timestamp::Formatted(s) => s.clone(),
            Timestamp::EpochMillis(ms) => Local
                .timestamp_millis_opt(*ms)
                .single()
                .map(|dt| dt.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

/// Canonical chat message. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Option<String>,
    pub text: Option<String>,
    /// Link to a shared location.
    pub url: Option<String>,
    pub timestamp: Option<Timestamp>,
}

impl ChatMessage {
    pub fn text(author: &str, text: &str) -> Self {
        Self {
            author: Some(author.to_string()),
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    /// Build from a raw server record.
    ///
    /// The server schema has two names for the author (`username`, then
    /// `sender_name`) and two for the timestamp (`created_at` string, then
    /// `createdat` epoch millis). The first present key wins.
    pub fn from_wire(item: &Value) -> Self {
        let non_empty_str = |key: &str| {
            item.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let author = non_empty_str("username").or_else(|| non_empty_str("sender_name"));
        let timestamp = non_empty_str("created_at")
            .map(Timestamp::Formatted)
            .or_else(|| {
                item.get("createdat")
                    .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                    .filter(|ms| *ms != 0)
                    .map(Timestamp::EpochMillis)
            });

        Self {
            author,
            text: non_empty_str("text"),
            url: non_empty_str("url"),
            timestamp,
        }
    }

    /// `"<author> • <time>"`; missing parts render empty.
    pub fn header(&self) -> String {
        let author = self.author.as_deref().unwrap_or_default();
        let time = self.timestamp.as_ref().map(Timestamp::display).unwrap_or_default();
        format!("{author} • {time}")
    }

    pub fn is_location(&self) -> bool {
        self.url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub username: Option<String>,
}

/// Membership snapshot for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomData {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub users: Vec<RosterEntry>,
}

impl RoomData {
    /// Usernames in server order; entries without one are skipped.
    pub fn usernames(&self) -> Vec<String> {
        self.users.iter().filter_map(|u| u.username.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsResponse {
    #[serde(default)]
    pub insights: Option<String>,
}
