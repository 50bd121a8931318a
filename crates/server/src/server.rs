use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};

use framecast::protocol::wall_clock_secs;
use framecast::{ControlCommand, FramePacket, ScheduledTask, ServerMessage};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::tracker::SessionTracker;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Per-connection streaming flags.
struct ClientState {
    id: String,
    streaming: bool,
    paused: bool,
    frames_received: u64,
}

impl ClientState {
    fn new(id: String) -> Self {
        Self {
            id,
            streaming: false,
            paused: false,
            frames_received: 0,
        }
    }
}

fn next_client_id() -> String {
    let millis = (wall_clock_secs() * 1000.0) as u64;
    format!("client_{}", millis % 100_000)
}

struct ServerState {
    config: ServerConfig,
    tracker: Mutex<SessionTracker>,
    clients: AtomicUsize,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerState {
    fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let state = Self {
            tracker: Mutex::new(SessionTracker::new(config.latency_window)),
            clients: AtomicUsize::new(0),
            events,
            config,
        };
        (state, receiver)
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Handles one text message and returns the reply to send, if any.
    fn process(
        &self,
        client: &mut ClientState,
        text: &str,
        received_at: f64,
    ) -> Option<ServerMessage> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Some(ServerMessage::error(format!("Invalid JSON: {e}"))),
        };

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("frame")
            .to_owned();
        if kind == "frame" || value.get("frame").is_some() {
            self.handle_frame(client, value, received_at)
        } else if kind == "control" {
            Some(self.handle_control(client, &value))
        } else {
            log::warn!("Unknown message type from {}: {kind}", client.id);
            None
        }
    }

    fn handle_frame(
        &self,
        client: &mut ClientState,
        value: Value,
        received_at: f64,
    ) -> Option<ServerMessage> {
        if client.paused {
            return None;
        }

        let mut tracker = self.tracker.lock();
        if !client.streaming {
            client.streaming = true;
            if tracker.current_session().is_none() {
                let session_id = tracker.create_session(None);
                self.emit(ServerEvent::SessionStarted { session_id });
            }
        }

        let packet: FramePacket = match serde_json::from_value(value) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Unreadable frame from {}: {e}", client.id);
                return None;
            }
        };
        tracker.record_frame(packet.payload_len(), (received_at - packet.timestamp) * 1000.0);
        client.frames_received += 1;
        log::trace!(
            "{} frame {} ({} bytes)",
            client.id,
            client.frames_received,
            packet.payload_len()
        );

        let every = self.config.ack_every.max(1);
        if client.frames_received % every != 0 {
            return None;
        }
        let mut ack = ServerMessage::ack();
        ack.frame_count = Some(client.frames_received);
        ack.stats = Some(tracker.stats().unwrap_or_default());
        Some(ack)
    }

    fn handle_control(&self, client: &mut ClientState, value: &Value) -> ServerMessage {
        let raw = value.get("command").cloned().unwrap_or(Value::Null);
        let command: ControlCommand = match serde_json::from_value(raw.clone()) {
            Ok(command) => command,
            Err(_) => {
                let name = raw.as_str().map(str::to_owned).unwrap_or_else(|| raw.to_string());
                return ServerMessage::error(format!("Unknown command: {name}"));
            }
        };
        log::debug!("{} sent {}", client.id, command.as_str());

        let mut reply = ServerMessage::status();
        reply.command = Some(command.as_str().to_owned());
        match command {
            ControlCommand::StartSession => {
                let requested = value
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let session_id = self.tracker.lock().create_session(requested);
                client.streaming = true;
                client.paused = false;
                self.emit(ServerEvent::SessionStarted {
                    session_id: session_id.clone(),
                });
                reply.session_id = Some(session_id);
                reply.message = Some("Session started".to_owned());
            }
            ControlCommand::EndSession => {
                let stats = self.tracker.lock().end_session();
                client.streaming = false;
                if let Some(stats) = &stats {
                    self.emit(ServerEvent::SessionEnded {
                        stats: stats.clone(),
                    });
                }
                reply.stats = Some(stats.unwrap_or_default());
                reply.message = Some("Session ended".to_owned());
            }
            ControlCommand::Pause => {
                client.paused = true;
                reply.message = Some("Streaming paused".to_owned());
            }
            ControlCommand::Resume => {
                client.paused = false;
                reply.message = Some("Streaming resumed".to_owned());
            }
            ControlCommand::GetStatus => {
                let tracker = self.tracker.lock();
                reply.stats = Some(tracker.stats().unwrap_or_default());
                reply.session = tracker.current_session().map(str::to_owned);
                reply.clients = Some(self.clients.load(Ordering::SeqCst));
            }
            ControlCommand::Ping => {
                let mut pong = ServerMessage::ack();
                pong.command = Some("pong".to_owned());
                pong.server_time = Some(wall_clock_secs());
                let client_time = value.get("client_time").and_then(Value::as_f64);
                pong.client_time = Some(client_time.unwrap_or(0.0));
                return pong;
            }
        }
        reply
    }
}

/// WebSocket endpoint that accepts frame streams and answers control
/// commands. Frames are counted and measured, never stored.
pub struct DevServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl DevServer {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let (state, events) = ServerState::new(config);
        Ok(Self {
            listener,
            state: Arc::new(state),
            events: Some(events),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connection and session events. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events.take()
    }

    /// Accepts clients until `shutdown` resolves, then drops every connection
    /// and closes the active session.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let reporter = ScheduledTask::spawn(report_stats(self.state.clone()));
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        while connections.try_join_next().is_some() {}
                        connections.spawn(serve_client(self.state.clone(), stream, addr));
                    }
                    Err(e) => self.state.emit(ServerEvent::Error {
                        message: format!("accept failed: {e}"),
                    }),
                },
            }
        }

        reporter.cancel();
        connections.shutdown().await;
        if let Some(stats) = self.state.tracker.lock().end_session() {
            self.state.emit(ServerEvent::SessionEnded { stats });
        }
    }
}

async fn serve_client(state: Arc<ServerState>, stream: TcpStream, addr: SocketAddr) {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(state.config.max_message_bytes);
    let ws = match accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            state.emit(ServerEvent::Error {
                message: format!("handshake with {addr} failed: {e}"),
            });
            return;
        }
    };

    let mut client = ClientState::new(next_client_id());
    state.clients.fetch_add(1, Ordering::SeqCst);
    state.emit(ServerEvent::ClientConnected {
        client_id: client.id.clone(),
        addr,
    });

    let reason = match pump(&state, &mut client, ws).await {
        Ok(()) => DisconnectReason::Graceful,
        Err(e) => {
            log::debug!("{} connection error: {e}", client.id);
            DisconnectReason::Dropped
        }
    };

    let remaining = state.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    state.emit(ServerEvent::ClientDisconnected {
        client_id: client.id,
        reason,
        remaining,
    });
}

async fn pump(
    state: &ServerState,
    client: &mut ClientState,
    ws: WebSocketStream<TcpStream>,
) -> Result<(), tungstenite::Error> {
    let (mut sink, mut source) = ws.split();

    let mut greeting = ServerMessage::status();
    greeting.client_id = Some(client.id.clone());
    greeting.message = Some("Connected to framecast server".to_owned());
    greeting.server_time = Some(wall_clock_secs());
    send(&mut sink, &greeting).await?;

    while let Some(message) = source.next().await {
        let received_at = wall_clock_secs();
        let reply = match message? {
            Message::Text(text) => state.process(client, text.as_str(), received_at),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => state.process(client, text, received_at),
                Err(e) => Some(ServerMessage::error(format!("Invalid JSON: {e}"))),
            },
            Message::Close(_) => break,
            _ => None,
        };
        if let Some(reply) = reply {
            send(&mut sink, &reply).await?;
        }
    }
    Ok(())
}

async fn send(sink: &mut WsSink, message: &ServerMessage) -> Result<(), tungstenite::Error> {
    match message.to_json() {
        Ok(text) => sink.send(Message::text(text)).await,
        Err(e) => {
            log::error!("Failed to encode reply: {e}");
            Ok(())
        }
    }
}

async fn report_stats(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(state.config.report_interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(stats) = state.tracker.lock().stats() else {
            continue;
        };
        if stats.frame_count > 0 {
            log::info!(
                "[Stats] Frames: {} | FPS: {:.1} | Latency: {:.0}ms | Queue: {} | Size: {:.1}MB",
                stats.frame_count,
                stats.fps,
                stats.avg_latency_ms,
                stats.queue_depth,
                stats.total_mb
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use framecast::{
        CameraIntrinsics, ClientMessage, ControlMessage, ImuPayload, ServerMessageKind,
    };

    use super::*;

    fn state() -> ServerState {
        ServerState::new(ServerConfig::default()).0
    }

    fn frame_json(timestamp: f64) -> String {
        ClientMessage::Frame(FramePacket {
            timestamp,
            payload: vec![0xAB; 2048],
            imu: ImuPayload::default(),
            camera_intrinsics: CameraIntrinsics::from_dimensions(1280, 720, 60.0),
        })
        .to_json()
        .unwrap()
    }

    fn control_json(command: ControlCommand) -> String {
        ClientMessage::Control(ControlMessage::new(command))
            .to_json()
            .unwrap()
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let state = state();
        let mut client = ClientState::new("c".into());
        let reply = state.process(&mut client, "{not json", 0.0).unwrap();
        assert_eq!(reply.kind, ServerMessageKind::Error);
        assert!(reply.error.unwrap().starts_with("Invalid JSON: "));
    }

    #[test]
    fn test_first_frame_opens_session_and_tenth_is_acked() {
        let state = state();
        let mut client = ClientState::new("c".into());
        let now = wall_clock_secs();

        for _ in 0..9 {
            assert!(state.process(&mut client, &frame_json(now - 0.05), now).is_none());
        }
        assert!(client.streaming);
        assert!(state.tracker.lock().current_session().is_some());

        let ack = state.process(&mut client, &frame_json(now - 0.05), now).unwrap();
        assert_eq!(ack.kind, ServerMessageKind::Ack);
        assert_eq!(ack.frame_count, Some(10));
        let stats = ack.stats.unwrap();
        assert_eq!(stats.frame_count, 10);
        assert!((stats.avg_latency_ms - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_paused_client_frames_are_ignored() {
        let state = state();
        let mut client = ClientState::new("c".into());

        let reply = state
            .process(&mut client, &control_json(ControlCommand::Pause), 0.0)
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("Streaming paused"));
        for _ in 0..20 {
            assert!(state.process(&mut client, &frame_json(0.0), 0.0).is_none());
        }
        assert_eq!(client.frames_received, 0);

        let reply = state
            .process(&mut client, &control_json(ControlCommand::Resume), 0.0)
            .unwrap();
        assert_eq!(reply.message.as_deref(), Some("Streaming resumed"));
        state.process(&mut client, &frame_json(0.0), 0.0);
        assert_eq!(client.frames_received, 1);
    }

    #[test]
    fn test_session_lifecycle_replies() {
        let state = state();
        let mut client = ClientState::new("c".into());

        let start = r#"{"type":"control","command":"start_session","session_id":"bench"}"#;
        let reply = state.process(&mut client, start, 0.0).unwrap();
        assert_eq!(reply.kind, ServerMessageKind::Status);
        assert_eq!(reply.command.as_deref(), Some("start_session"));
        assert_eq!(reply.session_id.as_deref(), Some("bench"));
        assert_eq!(reply.message.as_deref(), Some("Session started"));

        state.process(&mut client, &frame_json(0.0), 0.0);
        let status = state
            .process(&mut client, &control_json(ControlCommand::GetStatus), 0.0)
            .unwrap();
        assert_eq!(status.session.as_deref(), Some("bench"));
        assert_eq!(status.clients, Some(0));
        assert_eq!(status.stats.unwrap().frame_count, 1);

        let end = state
            .process(&mut client, &control_json(ControlCommand::EndSession), 0.0)
            .unwrap();
        assert_eq!(end.message.as_deref(), Some("Session ended"));
        let stats = end.stats.unwrap();
        assert_eq!(stats.session_id.as_deref(), Some("bench"));
        assert_eq!(stats.frame_count, 1);
        assert!(!client.streaming);
        assert!(state.tracker.lock().current_session().is_none());
    }

    #[test]
    fn test_ping_echoes_client_time() {
        let state = state();
        let mut client = ClientState::new("c".into());
        let ping = ControlMessage::new(ControlCommand::Ping).with_client_time(42.5);
        let ping = ClientMessage::Control(ping).to_json().unwrap();

        let pong = state.process(&mut client, &ping, 0.0).unwrap();
        assert!(pong.is_pong());
        assert_eq!(pong.client_time, Some(42.5));
        assert!(pong.server_time.is_some());
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let state = state();
        let mut client = ClientState::new("c".into());
        let reply = state
            .process(&mut client, r#"{"type":"control","command":"rewind"}"#, 0.0)
            .unwrap();
        assert_eq!(reply.error.as_deref(), Some("Unknown command: rewind"));

        let reply = state.process(&mut client, r#"{"type":"control"}"#, 0.0).unwrap();
        assert_eq!(reply.error.as_deref(), Some("Unknown command: null"));
    }

    #[test]
    fn test_unknown_type_gets_no_reply() {
        let state = state();
        let mut client = ClientState::new("c".into());
        assert!(state.process(&mut client, r#"{"type":"telemetry"}"#, 0.0).is_none());
    }

    #[test]
    fn test_session_events_are_emitted() {
        let (state, mut events) = ServerState::new(ServerConfig::default());
        let mut client = ClientState::new("c".into());
        state.process(&mut client, &frame_json(0.0), 0.0);
        state.process(&mut client, &control_json(ControlCommand::EndSession), 0.0);

        assert!(matches!(events.try_recv(), Ok(ServerEvent::SessionStarted { .. })));
        match events.try_recv() {
            Ok(ServerEvent::SessionEnded { stats }) => assert_eq!(stats.frame_count, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
