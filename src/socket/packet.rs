//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only the websocket transport is spoken, so every Engine.IO packet is one
//! text frame and binary attachments are never produced.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ChatError, Result};

/// Handshake data sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(String),
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChatError::Protocol("empty engine.io frame".into()))?;
        let rest = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(rest)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping,
            '3' => EnginePacket::Pong,
            '4' => EnginePacket::Message(rest.to_string()),
            '6' => EnginePacket::Noop,
            other => return Err(ChatError::Protocol(format!("unknown engine.io packet type {other:?}"))),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                    "maxPayload": info.max_payload,
                })
            ),
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping => "2".into(),
            EnginePacket::Pong => "3".into(),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Noop => "6".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketKind {
    fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => PacketKind::Connect,
            '1' => PacketKind::Disconnect,
            '2' => PacketKind::Event,
            '3' => PacketKind::Ack,
            '4' => PacketKind::ConnectError,
            '5' => PacketKind::BinaryEvent,
            '6' => PacketKind::BinaryAck,
            _ => return None,
        })
    }

    fn digit(self) -> char {
        match self {
            PacketKind::Connect => '0',
            PacketKind::Disconnect => '1',
            PacketKind::Event => '2',
            PacketKind::Ack => '3',
            PacketKind::ConnectError => '4',
            PacketKind::BinaryEvent => '5',
            PacketKind::BinaryAck => '6',
        }
    }
}

/// A Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Namespace; `"/"` is the main one and is omitted on the wire.
    pub nsp: String,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

impl Packet {
    pub const MAIN_NSP: &'static str = "/";

    fn new(kind: PacketKind, ack_id: Option<u64>, data: Option<Value>) -> Self {
        Self {
            kind,
            nsp: Self::MAIN_NSP.to_string(),
            ack_id,
            data,
        }
    }

    pub fn connect() -> Self {
        Self::new(PacketKind::Connect, None, None)
    }

    pub fn disconnect() -> Self {
        Self::new(PacketKind::Disconnect, None, None)
    }

    pub fn event(name: &str, payload: Value, ack_id: Option<u64>) -> Self {
        Self::new(PacketKind::Event, ack_id, Some(Value::Array(vec![Value::String(name.into()), payload])))
    }

    pub fn ack(ack_id: u64, args: Vec<Value>) -> Self {
        Self::new(PacketKind::Ack, Some(ack_id), Some(Value::Array(args)))
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.nsp != Self::MAIN_NSP {
            out.push_str(&self.nsp);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .and_then(PacketKind::from_digit)
            .ok_or_else(|| ChatError::Protocol(format!("bad socket.io packet: {body:?}")))?;
        if matches!(kind, PacketKind::BinaryEvent | PacketKind::BinaryAck) {
            return Err(ChatError::Protocol("binary socket.io packets are not supported".into()));
        }
        let mut rest = chars.as_str();

        let mut nsp = Self::MAIN_NSP.to_string();
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            nsp = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            Some(rest[..digits]
                .parse::<u64>()
                .map_err(|_| ChatError::Protocol(format!("ack id out of range: {body:?}")))?)
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };
        Ok(Self { kind, nsp, ack_id, data })
    }

    /// Split an EVENT payload into its name and arguments.
    pub fn event_parts(&self) -> Result<(String, Vec<Value>)> {
        let mut items = match &self.data {
            Some(Value::Array(items)) => items.clone().into_iter(),
            _ => return Err(ChatError::Protocol("event payload is not an array".into())),
        };
        match items.next() {
            Some(Value::String(name)) => Ok((name, items.collect())),
            _ => Err(ChatError::Protocol("event name is not a string".into())),
        }
    }

    /// Arguments of an ACK packet.
    pub fn ack_args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_packet() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(info) => {
                assert_eq!(info.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(info.ping_interval, 25_000);
                assert_eq!(info.ping_timeout, 20_000);
                assert_eq!(info.max_payload, Some(1_000_000));
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("40").unwrap(), EnginePacket::Message("0".into()));
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
    }

    #[test]
    fn encodes_event_with_ack_id() {
        let p = Packet::event("join", json!({"username": "anon", "room": "general"}), Some(12));
        let wire = p.encode();
        assert!(wire.starts_with(r#"212["join","#));
        assert_eq!(Packet::decode(&wire).unwrap(), p);
        assert_eq!(EnginePacket::Message(p.encode()).encode().chars().next(), Some('4'));
    }

    #[test]
    fn encodes_connect_and_disconnect() {
        assert_eq!(Packet::connect().encode(), "0");
        assert_eq!(Packet::disconnect().encode(), "1");
    }

    #[test]
    fn decodes_event() {
        let p = Packet::decode(r#"2["message",{"username":"a","text":"hi"}]"#).unwrap();
        assert_eq!(p.kind, PacketKind::Event);
        assert_eq!(p.ack_id, None);
        let (name, args) = p.event_parts().unwrap();
        assert_eq!(name, "message");
        assert_eq!(args, vec![json!({"username": "a", "text": "hi"})]);
    }

    #[test]
    fn decodes_ack_with_id() {
        let p = Packet::decode(r#"37["Username is in use!"]"#).unwrap();
        assert_eq!(p.kind, PacketKind::Ack);
        assert_eq!(p.ack_id, Some(7));
        assert_eq!(p.ack_args(), vec![json!("Username is in use!")]);

        let empty = Packet::decode("33[]").unwrap();
        assert_eq!(empty.ack_id, Some(3));
        assert!(empty.ack_args().is_empty());
    }

    #[test]
    fn decodes_namespace() {
        let p = Packet::decode(r#"2/admin,5["x"]"#).unwrap();
        assert_eq!(p.nsp, "/admin");
        assert_eq!(p.ack_id, Some(5));
        assert_eq!(p.encode(), r#"2/admin,5["x"]"#);

        let connect = Packet::decode("0/admin,").unwrap();
        assert_eq!(connect.nsp, "/admin");
        assert_eq!(connect.data, None);
    }

    #[test]
    fn decodes_connect_and_connect_error() {
        let ok = Packet::decode(r#"0{"sid":"abc"}"#).unwrap();
        assert_eq!(ok.kind, PacketKind::Connect);
        assert_eq!(ok.data, Some(json!({"sid": "abc"})));

        let err = Packet::decode(r#"4{"message":"invalid token"}"#).unwrap();
        assert_eq!(err.kind, PacketKind::ConnectError);
    }

    #[test]
    fn rejects_binary_packets() {
        assert!(Packet::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).is_err());
    }

    #[test]
    fn event_parts_requires_name() {
        let p = Packet::decode("2[1,2]").unwrap();
        assert!(p.event_parts().is_err());
    }
}
