//! End-to-end tests against an in-process Engine.IO / Socket.IO server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use roomchat::ChatError;
use roomchat::api::events::{ClientRequest, ConnectionEvent};
use roomchat::api::models::Coordinates;
use roomchat::chat::{ChatSession, ChatState, FixedLocation};
use roomchat::socket::{ConnectionManager, SocketConfig};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Query(String),
    Pong,
    /// A client EVENT frame, raw text plus its hand-split parts.
    Emit {
        raw: String,
        ack_id: Option<u64>,
        name: String,
        payload: Value,
    },
    Disconnect,
}

impl Observed {
    fn is_emit(&self) -> bool {
        matches!(self, Observed::Emit { .. })
    }

    fn emit_parts(&self) -> (&str, &Value) {
        match self {
            Observed::Emit { name, payload, .. } => (name, payload),
            other => panic!("expected an emit, got {other:?}"),
        }
    }
}

#[derive(Clone, Copy)]
struct ServerOptions {
    reject: Option<&'static str>,
    ping_interval: u64,
    ping_timeout: u64,
    /// Send one ping right after the handshake.
    ping: bool,
    /// Answer acknowledged emits.
    ack: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            reject: None,
            ping_interval: 25_000,
            ping_timeout: 20_000,
            ping: true,
            ack: true,
        }
    }
}

struct FakeServer {
    base: Url,
    observed: mpsc::UnboundedReceiver<Observed>,
}

impl FakeServer {
    async fn next(&mut self) -> Observed {
        timeout(TIMEOUT, self.observed.recv())
            .await
            .expect("server observation timed out")
            .expect("server task ended")
    }

    /// Skip observations until one matches.
    async fn expect(&mut self, wanted: impl Fn(&Observed) -> bool) -> Observed {
        loop {
            let seen = self.next().await;
            if wanted(&seen) {
                return seen;
            }
        }
    }
}

async fn spawn_server(opts: ServerOptions) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, observed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let tx = tx.clone();
            tokio::spawn(async move {
                let query_tx = tx.clone();
                let record_query = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = query_tx.send(Observed::Query(req.uri().query().unwrap_or_default().to_string()));
                    Ok(resp)
                };
                let ws = tokio_tungstenite::accept_hdr_async(stream, record_query).await.unwrap();
                serve(ws, opts, tx).await;
            });
        }
    });

    FakeServer {
        base: Url::parse(&format!("http://{addr}")).unwrap(),
        observed,
    }
}

/// Split a client `42<ack id>[name, payload]` frame without the crate's codec.
fn split_event(text: &str) -> Option<(Option<u64>, String, Value)> {
    let rest = text.strip_prefix("42")?;
    let (digits, array) = rest.split_at(rest.find('[')?);
    let ack_id = if digits.is_empty() { None } else { Some(digits.parse::<u64>().ok()?) };
    let mut args: Vec<Value> = serde_json::from_str(array).ok()?;
    if args.is_empty() {
        return None;
    }
    let name = args.remove(0).as_str()?.to_string();
    Some((ack_id, name, args.into_iter().next().unwrap_or(Value::Null)))
}

async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    opts: ServerOptions,
    tx: mpsc::UnboundedSender<Observed>,
) {
    let open = json!({
        "sid": "engine-1",
        "upgrades": [],
        "pingInterval": opts.ping_interval,
        "pingTimeout": opts.ping_timeout,
        "maxPayload": 1_000_000
    });
    ws.send(Message::Text(format!("0{open}"))).await.unwrap();

    match ws.next().await {
        Some(Ok(Message::Text(t))) if t == "40" => {}
        other => panic!("expected socket.io connect, got {other:?}"),
    }
    if let Some(reason) = opts.reject {
        let _ = ws.send(Message::Text(format!("44{}", json!({ "message": reason })))).await;
        return;
    }
    ws.send(Message::Text(r#"40{"sid":"socket-1"}"#.into())).await.unwrap();
    if opts.ping {
        ws.send(Message::Text("2".into())).await.unwrap();
    }

    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else { continue };
        match text.as_str() {
            "3" => {
                let _ = tx.send(Observed::Pong);
                continue;
            }
            "41" => {
                let _ = tx.send(Observed::Disconnect);
                break;
            }
            _ => {}
        }
        let Some((ack_id, name, payload)) = split_event(&text) else {
            panic!("unexpected client frame {text:?}");
        };
        let _ = tx.send(Observed::Emit {
            raw: text.clone(),
            ack_id,
            name: name.clone(),
            payload: payload.clone(),
        });
        let (ack, follow_up) = respond(&name, &payload);
        if let (Some(id), true) = (ack_id, opts.ack) {
            ws.send(Message::Text(format!("43{id}{}", Value::Array(ack)))).await.unwrap();
        }
        for frame in follow_up {
            ws.send(Message::Text(frame)).await.unwrap();
        }
    }
}

fn event_frame(name: &str, data: Value) -> String {
    format!("42{}", json!([name, data]))
}

/// Ack arguments and raw frames pushed after one client request.
fn respond(name: &str, payload: &Value) -> (Vec<Value>, Vec<String>) {
    match name {
        "join" => (
            vec![Value::Null],
            vec![
                event_frame("roomHistory", json!([
                    {"username": "ann", "text": "hi", "createdat": 1_700_000_000_000_i64},
                    {"sender_name": "bob", "text": "yo", "created_at": "10:00"}
                ])),
                event_frame("roomData", json!({
                    "room": payload["room"],
                    "users": [{"username": "ann"}, {"username": "bob"}]
                })),
            ],
        ),
        "SendMessage" if payload == "bad words" => (vec![json!("Profanity is not allowed!")], vec![]),
        "SendMessage" => (
            vec![],
            vec![
                // Traffic for another namespace must not reach the room.
                format!("42/admin,{}", json!(["message", {"username": "eve", "text": "psst"}])),
                event_frame("message", json!({"username": "ann", "text": payload})),
            ],
        ),
        "SendLocation" => (
            vec![],
            vec![event_frame("locationmessage", json!({
                "username": "ann",
                "url": format!("https://google.com/maps?q={},{}", payload["latitude"], payload["longitude"])
            }))],
        ),
        _ => (vec![], vec![]),
    }
}

fn manager(base: &Url, config: SocketConfig) -> ConnectionManager {
    ConnectionManager::new(base.clone(), config, Handle::current())
}

async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("client event timed out")
        .expect("event channel closed")
}

/// Feed events into `state` until `done` holds.
async fn pump_until(
    rx: &mut broadcast::Receiver<ConnectionEvent>,
    state: &mut ChatState,
    done: impl Fn(&ChatState) -> bool,
) {
    while !done(state) {
        let ev = next_event(rx).await;
        state.apply(&ev);
    }
}

#[tokio::test]
async fn join_flow_fills_history_and_roster() {
    let mut server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("secret-token").unwrap();
    let mut events = conn.subscribe();
    let session = ChatSession::new(conn.clone());

    // Issued before the handshake finishes; buffered until connected.
    timeout(TIMEOUT, session.join("", "general")).await.unwrap().unwrap();

    match server.next().await {
        Observed::Query(q) => {
            assert!(q.contains("EIO=4"), "query was {q}");
            assert!(q.contains("transport=websocket"), "query was {q}");
            assert!(q.contains("token=secret-token"), "query was {q}");
        }
        other => panic!("expected query first, got {other:?}"),
    }
    let join = server.expect(Observed::is_emit).await;
    match &join {
        Observed::Emit { raw, ack_id, .. } => {
            assert!(raw.starts_with(r#"420["join",{"#), "frame was {raw}");
            assert_eq!(*ack_id, Some(0));
        }
        other => panic!("expected join emit, got {other:?}"),
    }
    assert_eq!(join.emit_parts(), ("join", &json!({"username": "anon", "room": "general"})));

    let mut state = ChatState::new();
    state.connected = conn.is_connected();
    pump_until(&mut events, &mut state, |s| s.messages.len() == 2 && s.roster.len() == 2).await;
    assert!(state.connected);
    assert_eq!(state.messages[0].author.as_deref(), Some("ann"));
    assert_eq!(state.messages[1].author.as_deref(), Some("bob"));
    assert_eq!(state.messages[1].header(), "bob • 10:00");
    assert_eq!(state.roster, vec!["ann", "bob"]);

    mgr.close();
}

#[tokio::test]
async fn subscribe_then_sample_flag_never_misses_connected() {
    let server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();

    // Either the flag is already up, or the Connected event is still ahead.
    let mut events = conn.subscribe();
    let mut state = ChatState::new();
    state.connected = conn.is_connected();
    pump_until(&mut events, &mut state, |s| s.connected).await;
    assert!(conn.is_connected());
    mgr.close();
}

#[tokio::test]
async fn answers_server_ping() {
    let mut server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();
    timeout(TIMEOUT, conn.wait_connected()).await.unwrap().unwrap();
    assert_eq!(server.expect(|o| *o == Observed::Pong).await, Observed::Pong);
    mgr.close();
}

#[tokio::test]
async fn send_message_round_trip_and_rejection() {
    let mut server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();
    let mut events = conn.subscribe();
    let session = ChatSession::new(conn.clone());

    assert!(!timeout(TIMEOUT, session.send_message("   ")).await.unwrap().unwrap());

    assert!(timeout(TIMEOUT, session.send_message("hello")).await.unwrap().unwrap());
    let sent = server.expect(Observed::is_emit).await;
    match &sent {
        Observed::Emit { raw, .. } => assert_eq!(raw, r#"420["SendMessage","hello"]"#),
        other => panic!("expected emit, got {other:?}"),
    }

    // The /admin message pushed first is dropped; only the room echo lands.
    let mut state = ChatState::new();
    pump_until(&mut events, &mut state, |s| !s.messages.is_empty()).await;
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].author.as_deref(), Some("ann"));
    assert_eq!(state.messages[0].text.as_deref(), Some("hello"));

    let err = timeout(TIMEOUT, session.send_message("bad words")).await.unwrap().unwrap_err();
    match err {
        ChatError::Rejected(msg) => assert_eq!(msg, "Profanity is not allowed!"),
        other => panic!("expected Rejected, got {other:?}"),
    }
    mgr.close();
}

#[tokio::test]
async fn share_location_appends_location_message() {
    let mut server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();
    let mut events = conn.subscribe();
    let session = ChatSession::new(conn.clone());

    let here = FixedLocation(Some(Coordinates { latitude: 45.5, longitude: 7.25 }));
    session.share_location(&here).unwrap();
    let sent = server.expect(Observed::is_emit).await;
    assert_eq!(
        sent.emit_parts(),
        ("SendLocation", &json!({"latitude": 45.5, "longitude": 7.25}))
    );

    let mut state = ChatState::new();
    pump_until(&mut events, &mut state, |s| !s.messages.is_empty()).await;
    assert!(state.messages[0].is_location());

    let nowhere = FixedLocation(None);
    assert!(matches!(
        session.share_location(&nowhere),
        Err(ChatError::LocationUnavailable)
    ));
    mgr.close();
}

#[tokio::test]
async fn share_location_does_not_wait_for_ack() {
    let mut server = spawn_server(ServerOptions {
        ack: false,
        ..ServerOptions::default()
    })
    .await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();
    timeout(TIMEOUT, conn.wait_connected()).await.unwrap().unwrap();
    let session = ChatSession::new(conn.clone());

    let here = FixedLocation(Some(Coordinates { latitude: 1.0, longitude: 2.0 }));
    session.share_location(&here).unwrap();
    session.share_location(&here).unwrap();

    let first = server.expect(Observed::is_emit).await;
    let second = server.expect(Observed::is_emit).await;
    assert_eq!(first.emit_parts().0, "SendLocation");
    assert_eq!(second.emit_parts().0, "SendLocation");
    assert!(conn.is_connected());
    mgr.close();
}

#[tokio::test]
async fn close_sends_disconnect() {
    let mut server = spawn_server(ServerOptions::default()).await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("t").unwrap();
    let mut events = conn.subscribe();
    timeout(TIMEOUT, conn.wait_connected()).await.unwrap().unwrap();

    mgr.close();
    assert!(mgr.current().is_none());
    server.expect(|o| *o == Observed::Disconnect).await;

    loop {
        if let ConnectionEvent::Disconnected(reason) = next_event(&mut events).await {
            assert_eq!(reason, "io client disconnect");
            break;
        }
    }
    assert!(!conn.is_connected());
    let late = conn.emit_with_ack(&ClientRequest::SendMessage("x".into())).await;
    assert!(matches!(late, Err(ChatError::NotConnected) | Err(ChatError::AckDropped)));
}

#[tokio::test]
async fn rejected_connection_does_not_retry() {
    let server = spawn_server(ServerOptions {
        reject: Some("invalid token"),
        ..ServerOptions::default()
    })
    .await;
    let mgr = manager(&server.base, SocketConfig::default());
    let conn = mgr.connect("expired").unwrap();
    let mut events = conn.subscribe();

    let mut state = ChatState::new();
    loop {
        let ev = next_event(&mut events).await;
        state.apply(&ev);
        if let ConnectionEvent::Rejected(reason) = ev {
            assert_eq!(reason, "invalid token");
            break;
        }
    }
    assert!(!state.connected);
    assert!(matches!(
        timeout(TIMEOUT, conn.wait_connected()).await.unwrap(),
        Err(ChatError::NotConnected)
    ));
}

#[tokio::test]
async fn reconnects_after_ping_timeout() {
    let mut server = spawn_server(ServerOptions {
        ping_interval: 50,
        ping_timeout: 50,
        ping: false,
        ..ServerOptions::default()
    })
    .await;
    let config = SocketConfig {
        reconnection_delay_ms: 10,
        reconnection_delay_max_ms: 20,
        ..SocketConfig::default()
    };
    let mgr = manager(&server.base, config);
    let conn: Arc<_> = mgr.connect("t").unwrap();
    let mut events = conn.subscribe();

    server.expect(|o| matches!(o, Observed::Query(_))).await;
    let mut saw_timeout = false;
    loop {
        match next_event(&mut events).await {
            ConnectionEvent::Disconnected(reason) if reason == "ping timeout" => saw_timeout = true,
            ConnectionEvent::Connected if saw_timeout => break,
            _ => {}
        }
    }
    server.expect(|o| matches!(o, Observed::Query(_))).await;
    // Same handle survives the reconnect.
    assert!(Arc::ptr_eq(&conn, &mgr.current().unwrap()));
    mgr.close();
}
