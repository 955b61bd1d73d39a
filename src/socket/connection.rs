//! One realtime connection: a background task owning the websocket, driven
//! through a command channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::api::events::{ClientRequest, ConnectionEvent, ServerEvent};
use crate::error::{ChatError, Result};
use crate::socket::packet::{EnginePacket, OpenInfo, Packet, PacketKind};
use crate::socket::{SocketConfig, socket_url};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolves with the server's acknowledgement arguments.
type AckTx = oneshot::Sender<Vec<Value>>;

const EVENT_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum Command {
    Emit {
        event: &'static str,
        payload: Value,
        ack: Option<AckTx>,
    },
    Close,
}

/// Handle to a realtime connection.
///
/// Creating one returns immediately; the handshake runs in the background and
/// emits issued before it completes are sent once the server accepts the
/// connection.
pub struct Connection {
    id: u64,
    token: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Receiver<bool>,
    runtime: Handle,
    _task: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start connecting to `base` with `token` on `runtime`.
    pub fn open(base: &Url, token: &str, config: &SocketConfig, runtime: &Handle) -> Result<Self> {
        let url = socket_url(base, token)?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state) = watch::channel(false);

        log::info!("connection #{id}: connecting to {base}");
        let driver = Driver {
            id,
            url,
            config: config.clone(),
            cmd_rx,
            backlog: VecDeque::new(),
            events: events.clone(),
            state: state_tx,
            next_ack_id: 0,
        };
        let task = runtime.spawn(driver.run());

        Ok(Self {
            id,
            token: token.to_string(),
            cmd_tx,
            events,
            state,
            runtime: runtime.clone(),
            _task: task,
        })
    }

    /// Process-unique instance number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token the connection was created with.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Events from the moment of subscription on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Wait until the handshake has completed.
    ///
    /// Fails with [`ChatError::NotConnected`] once the connection has
    /// stopped for good.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|connected| *connected)
            .await
            .map(|_| ())
            .map_err(|_| ChatError::NotConnected)
    }

    /// Fire-and-forget emit.
    pub fn emit(&self, request: &ClientRequest) -> Result<()> {
        self.send(request, None)
    }

    /// Emit and wait for the server's acknowledgement arguments.
    pub async fn emit_with_ack(&self, request: &ClientRequest) -> Result<Vec<Value>> {
        self.emit_acked(request)?.await.map_err(|_| ChatError::AckDropped)
    }

    /// Emit with an ack id and hand back the receiver instead of waiting.
    ///
    /// The receiver errors when the session ends before the server answers.
    pub fn emit_acked(&self, request: &ClientRequest) -> Result<oneshot::Receiver<Vec<Value>>> {
        let (tx, rx) = oneshot::channel();
        self.send(request, Some(tx))?;
        Ok(rx)
    }

    /// Runtime the background task runs on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn send(&self, request: &ClientRequest, ack: Option<AckTx>) -> Result<()> {
        self.cmd_tx
            .send(Command::Emit {
                event: request.name(),
                payload: request.payload()?,
                ack,
            })
            .map_err(|_| ChatError::NotConnected)
    }

    /// Ask the background task to disconnect gracefully. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

/// Why a single transport session ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// Client asked to close, or every handle was dropped.
    Closed,
    /// Server sent a Socket.IO disconnect.
    ServerDisconnect,
    /// Server refused the Socket.IO connect.
    Rejected(String),
    /// Transport failed; eligible for reconnection.
    Lost(String),
}

/// Result of feeding one inbound frame to the session.
enum Inbound {
    Continue,
    Pinged,
    End(SessionEnd),
}

struct Driver {
    id: u64,
    url: Url,
    config: SocketConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    /// Emits waiting for a live session.
    backlog: VecDeque<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Sender<bool>,
    next_ack_id: u64,
}

impl Driver {
    async fn run(mut self) {
        let mut failures = 0u32;
        loop {
            let (end, handshaken) = self.session().await;
            self.state.send_replace(false);
            if handshaken {
                failures = 0;
            }
            match end {
                SessionEnd::Closed => {
                    log::info!("connection #{}: closed by client", self.id);
                    self.notify(ConnectionEvent::Disconnected("io client disconnect".into()));
                    break;
                }
                SessionEnd::ServerDisconnect => {
                    log::info!("connection #{}: closed by server", self.id);
                    self.notify(ConnectionEvent::Disconnected("io server disconnect".into()));
                    break;
                }
                SessionEnd::Rejected(reason) => {
                    log::warn!("connection #{}: rejected: {reason}", self.id);
                    self.notify(ConnectionEvent::Rejected(reason));
                    break;
                }
                SessionEnd::Lost(reason) => {
                    log::warn!("connection #{}: lost: {reason}", self.id);
                    self.notify(ConnectionEvent::Disconnected(reason));
                    failures += 1;
                    if !self.config.may_retry(failures - 1) {
                        break;
                    }
                    let delay = self.config.backoff(failures);
                    log::info!("connection #{}: reconnecting in {delay:?}", self.id);
                    if !self.idle(delay).await {
                        self.notify(ConnectionEvent::Disconnected("io client disconnect".into()));
                        break;
                    }
                }
            }
        }
    }

    fn notify(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Wait out a reconnect delay, queueing emits. Returns `false` if the
    /// client closed meanwhile.
    async fn idle(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => return false,
                    Some(emit) => self.backlog.push_back(emit),
                },
            }
        }
    }

    /// One websocket lifetime: connect, handshake, then pump frames and
    /// commands. The flag tells whether the handshake completed.
    async fn session(&mut self) -> (SessionEnd, bool) {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let ws = match self.handshake(timeout).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(end)) => return (end, false),
            Err(e) => return (SessionEnd::Lost(e.to_string()), false),
        };
        let (mut ws, open) = ws;

        self.state.send_replace(true);
        log::info!("connection #{}: connected (sid {})", self.id, open.sid);
        self.notify(ConnectionEvent::Connected);

        let heartbeat = Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout));
        let mut ping_deadline = Instant::now() + heartbeat;
        let mut pending: HashMap<u64, AckTx> = HashMap::new();

        while let Some(cmd) = self.backlog.pop_front() {
            if let Some(end) = self.dispatch(cmd, &mut ws, &mut pending).await {
                return (end, true);
            }
        }

        let end = loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let cmd = cmd.unwrap_or(Command::Close);
                    if let Some(end) = self.dispatch(cmd, &mut ws, &mut pending).await {
                        break end;
                    }
                }
                frame = ws.next() => match self.inbound(frame, &mut ws, &mut pending).await {
                    Inbound::Continue => {}
                    Inbound::Pinged => ping_deadline = Instant::now() + heartbeat,
                    Inbound::End(end) => break end,
                },
                _ = sleep_until(ping_deadline) => break SessionEnd::Lost("ping timeout".into()),
            }
        };
        if !pending.is_empty() {
            log::debug!("connection #{}: dropping {} pending acks", self.id, pending.len());
        }
        (end, true)
    }

    /// Open the websocket and complete the Engine.IO + Socket.IO handshake.
    ///
    /// The outer error is a transport failure; the inner one a definitive
    /// end (client close or server rejection).
    async fn handshake(
        &mut self,
        timeout: Duration,
    ) -> Result<std::result::Result<(WsStream, OpenInfo), SessionEnd>> {
        let deadline = Instant::now() + timeout;
        let connecting = connect_async(self.url.as_str());
        tokio::pin!(connecting);

        let mut ws = loop {
            tokio::select! {
                res = &mut connecting => break res?.0,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => return Ok(Err(SessionEnd::Closed)),
                    Some(emit) => self.backlog.push_back(emit),
                },
                _ = sleep_until(deadline) => return Err(ChatError::Protocol("connect timeout".into())),
            }
        };

        let mut open: Option<OpenInfo> = None;
        loop {
            let frame = tokio::select! {
                frame = ws.next() => frame,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Close) => {
                            let _ = ws.close(None).await;
                            return Ok(Err(SessionEnd::Closed));
                        }
                        Some(emit) => self.backlog.push_back(emit),
                    }
                    continue;
                }
                _ = sleep_until(deadline) => return Err(ChatError::Protocol("connect timeout".into())),
            };
            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ChatError::Protocol("closed during handshake".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            match EnginePacket::decode(&text)? {
                EnginePacket::Open(info) => {
                    log::debug!(
                        "connection #{}: engine.io open, ping every {}ms",
                        self.id,
                        info.ping_interval
                    );
                    open = Some(info);
                    ws.send(Message::Text(EnginePacket::Message(Packet::connect().encode()).encode()))
                        .await?;
                }
                EnginePacket::Ping => ws.send(Message::Text(EnginePacket::Pong.encode())).await?,
                EnginePacket::Close => return Err(ChatError::Protocol("closed during handshake".into())),
                EnginePacket::Message(body) => {
                    let packet = Packet::decode(&body)?;
                    if packet.nsp != Packet::MAIN_NSP {
                        log::debug!("connection #{}: ignoring namespace {} during handshake", self.id, packet.nsp);
                        continue;
                    }
                    match packet.kind {
                        PacketKind::Connect => {
                            let info = open
                                .take()
                                .ok_or_else(|| ChatError::Protocol("connect before engine.io open".into()))?;
                            return Ok(Ok((ws, info)));
                        }
                        PacketKind::ConnectError => {
                            return Ok(Err(SessionEnd::Rejected(connect_error_message(packet.data.as_ref()))));
                        }
                        other => log::debug!("connection #{}: ignoring {other:?} before connect", self.id),
                    }
                }
                EnginePacket::Pong | EnginePacket::Noop => {}
            }
        }
    }

    /// Send one command on a live session.
    async fn dispatch(
        &mut self,
        cmd: Command,
        ws: &mut WsStream,
        pending: &mut HashMap<u64, AckTx>,
    ) -> Option<SessionEnd> {
        match cmd {
            Command::Close => {
                let bye = EnginePacket::Message(Packet::disconnect().encode()).encode();
                let _ = ws.send(Message::Text(bye)).await;
                let _ = ws.close(None).await;
                Some(SessionEnd::Closed)
            }
            Command::Emit { event, payload, ack } => {
                let ack_id = ack.map(|tx| {
                    let id = self.next_ack_id;
                    self.next_ack_id += 1;
                    pending.insert(id, tx);
                    id
                });
                log::debug!("connection #{}: emit {event}", self.id);
                let frame = EnginePacket::Message(Packet::event(event, payload, ack_id).encode()).encode();
                match ws.send(Message::Text(frame)).await {
                    Ok(()) => None,
                    Err(e) => Some(SessionEnd::Lost(format!("transport error: {e}"))),
                }
            }
        }
    }

    async fn inbound(
        &mut self,
        frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
        ws: &mut WsStream,
        pending: &mut HashMap<u64, AckTx>,
    ) -> Inbound {
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Inbound::End(SessionEnd::Lost("transport close".into())),
            Some(Ok(_)) => return Inbound::Continue,
            Some(Err(e)) => return Inbound::End(SessionEnd::Lost(format!("transport error: {e}"))),
        };
        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("connection #{}: {e}", self.id);
                return Inbound::Continue;
            }
        };
        match packet {
            EnginePacket::Ping => {
                if let Err(e) = ws.send(Message::Text(EnginePacket::Pong.encode())).await {
                    return Inbound::End(SessionEnd::Lost(format!("transport error: {e}")));
                }
                Inbound::Pinged
            }
            EnginePacket::Close => Inbound::End(SessionEnd::Lost("transport close".into())),
            EnginePacket::Message(body) => match Packet::decode(&body) {
                Ok(packet) => self.socket_packet(packet, pending),
                Err(e) => {
                    log::warn!("connection #{}: {e}", self.id);
                    Inbound::Continue
                }
            },
            EnginePacket::Open(_) | EnginePacket::Pong | EnginePacket::Noop => Inbound::Continue,
        }
    }

    fn socket_packet(&mut self, packet: Packet, pending: &mut HashMap<u64, AckTx>) -> Inbound {
        if packet.nsp != Packet::MAIN_NSP {
            log::debug!("connection #{}: ignoring {:?} for namespace {}", self.id, packet.kind, packet.nsp);
            return Inbound::Continue;
        }
        match packet.kind {
            PacketKind::Event => {
                let (name, args) = match packet.event_parts() {
                    Ok(parts) => parts,
                    Err(e) => {
                        log::warn!("connection #{}: {e}", self.id);
                        return Inbound::Continue;
                    }
                };
                match ServerEvent::decode(&name, args.first()) {
                    Ok(Some(event)) => self.notify(ConnectionEvent::Server(event)),
                    Ok(None) => log::debug!("connection #{}: unhandled event {name}", self.id),
                    Err(e) => log::warn!("connection #{}: dropping {name}: {e}", self.id),
                }
                Inbound::Continue
            }
            PacketKind::Ack => {
                let Some(id) = packet.ack_id else {
                    return Inbound::Continue;
                };
                match pending.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(packet.ack_args());
                    }
                    None => log::debug!("connection #{}: ack {id} has no pending emit", self.id),
                }
                Inbound::Continue
            }
            PacketKind::Disconnect => Inbound::End(SessionEnd::ServerDisconnect),
            PacketKind::ConnectError => {
                Inbound::End(SessionEnd::Rejected(connect_error_message(packet.data.as_ref())))
            }
            PacketKind::Connect | PacketKind::BinaryEvent | PacketKind::BinaryAck => Inbound::Continue,
        }
    }
}

/// Text of a CONNECT_ERROR payload (`{"message": ...}` or a bare string).
fn connect_error_message(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| v.to_string()),
        None => "connection refused".into(),
    }
}
