use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, watch};

use super::connector::Connector;
use super::{
    ConnectionState, Endpoint, TransportConfig, TransportCounters, TransportError,
    reconnect_delay,
};
use crate::protocol::{
    ClientMessage, ControlCommand, ControlMessage, FramePacket, ServerMessage, ServerMessageKind,
    SessionStats, wall_clock_secs,
};
use crate::task::ScheduledTask;

const TRANSITION_BACKLOG: usize = 64;

/// Called with every parsed server message, whatever its kind.
pub type MessageObserver = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

#[derive(Default)]
struct LinkState {
    /// Bumped by every `connect` and `disconnect`; callbacks from older
    /// connections compare against it and bail out.
    epoch: u64,
    attempts: u32,
    url: Option<String>,
    outbound: Option<mpsc::Sender<String>>,
    connection: Option<ScheduledTask>,
    reconnect: Option<ScheduledTask>,
    keepalive: Option<ScheduledTask>,
}

impl LinkState {
    fn close(&mut self) {
        self.reconnect = None;
        self.keepalive = None;
        self.outbound = None;
        self.connection = None;
    }
}

#[derive(Debug, Default)]
struct RemoteStatus {
    client_id: Option<String>,
    server_stats: Option<SessionStats>,
    session_id: Option<String>,
    last_error: Option<String>,
    round_trip_ms: Option<f64>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    link: Mutex<LinkState>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    remote: Mutex<RemoteStatus>,
    observers: Mutex<Vec<MessageObserver>>,
    frames_sent: AtomicU64,
    frames_acked: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Connection {previous} -> {state}");
            let _ = self.transitions.send(state);
        }
    }

    fn open(self: &Arc<Self>, epoch: u64, url: String) -> ScheduledTask {
        ScheduledTask::spawn(Arc::clone(self).run_connection(epoch, url))
    }

    async fn run_connection(self: Arc<Self>, epoch: u64, url: String) {
        log::info!("Connecting to {url}");
        let link = match self
            .connector
            .connect(url.clone(), self.config.outbound_capacity)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                log::warn!("Could not connect to {url}: {e}");
                self.on_closed(epoch);
                return;
            }
        };

        let mut inbound = link.inbound;
        let _guard = link.guard;
        if !self.on_open(epoch, link.outbound) {
            return;
        }

        while let Some(text) = inbound.recv().await {
            self.handle_inbound(&text);
        }

        log::warn!("Connection to {url} closed unexpectedly");
        self.on_closed(epoch);
    }

    fn on_open(self: &Arc<Self>, epoch: u64, outbound: mpsc::Sender<String>) -> bool {
        let mut link = self.link.lock();
        if link.epoch != epoch {
            return false;
        }
        link.outbound = Some(outbound);
        link.attempts = 0;
        link.keepalive = self.config.ping_interval.map(|period| {
            ScheduledTask::spawn(Arc::clone(self).keepalive(epoch, period))
        });
        self.reset_counters();
        self.set_state(ConnectionState::Connected);
        log::info!("Connected");
        true
    }

    fn on_closed(self: &Arc<Self>, epoch: u64) {
        let mut link = self.link.lock();
        if link.epoch != epoch {
            return;
        }
        link.outbound = None;
        link.keepalive = None;

        let max_attempts = self.config.max_attempts;
        if link.attempts >= max_attempts {
            log::error!("Giving up after {max_attempts} reconnect attempts");
            self.set_state(ConnectionState::Error);
            return;
        }

        link.attempts += 1;
        let attempt = link.attempts;
        let delay = reconnect_delay(self.config.base_delay, attempt);
        link.reconnect = Some(ScheduledTask::after(
            delay,
            Arc::clone(self).reconnect_now(epoch),
        ));
        self.set_state(ConnectionState::Reconnecting);
        log::info!("Reconnecting in {delay:?} (attempt {attempt}/{max_attempts})");
    }

    async fn reconnect_now(self: Arc<Self>, epoch: u64) {
        let mut link = self.link.lock();
        if link.epoch != epoch {
            return;
        }
        let Some(url) = link.url.clone() else {
            return;
        };
        self.set_state(ConnectionState::Connecting);
        link.connection = Some(self.open(epoch, url));
    }

    async fn keepalive(self: Arc<Self>, epoch: u64, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.link.lock().epoch != epoch {
                return;
            }
            self.send_control(ControlCommand::Ping);
        }
    }

    fn outbound(&self) -> Option<mpsc::Sender<String>> {
        if *self.state.borrow() != ConnectionState::Connected {
            return None;
        }
        self.link.lock().outbound.clone()
    }

    fn send_frame(&self, packet: FramePacket) -> bool {
        let Some(outbound) = self.outbound() else {
            return false;
        };
        let text = match ClientMessage::Frame(packet).to_json() {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Dropping frame: {e}");
                return false;
            }
        };

        match outbound.try_send(text) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                log::trace!("Writer busy, dropping frame");
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn send_control(&self, command: ControlCommand) -> bool {
        let Some(outbound) = self.outbound() else {
            log::info!("Not connected, {} not sent", command.as_str());
            return false;
        };

        let mut message = ControlMessage::new(command);
        if command != ControlCommand::StartSession {
            message = message.with_session(self.remote.lock().session_id.clone());
        }
        if command == ControlCommand::Ping {
            message = message.with_client_time(wall_clock_secs());
        }

        let sent = ClientMessage::Control(message)
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|text| outbound.try_send(text).map_err(|e| e.to_string()));
        match sent {
            Ok(()) => {
                log::debug!("Sent {}", command.as_str());
                true
            }
            Err(e) => {
                log::warn!("Could not send {}: {e}", command.as_str());
                false
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        let message = match ServerMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Discarding malformed server message: {e}");
                return;
            }
        };

        {
            let mut remote = self.remote.lock();
            if let Some(stats) = &message.stats {
                if stats.session_id.is_some() {
                    remote.session_id = stats.session_id.clone();
                }
                remote.server_stats = Some(stats.clone());
            }

            match message.kind {
                ServerMessageKind::Status => {
                    if let Some(client_id) = &message.client_id {
                        log::info!("Assigned client id {client_id}");
                        remote.client_id = Some(client_id.clone());
                    }
                    if let Some(session_id) = &message.session_id {
                        remote.session_id = Some(session_id.clone());
                    }
                }
                ServerMessageKind::Ack => {
                    if let Some(count) = message.frame_count {
                        self.frames_acked.store(count, Ordering::Relaxed);
                    }
                    if message.is_pong() {
                        if let Some(sent_at) = message.client_time {
                            let rtt = ((wall_clock_secs() - sent_at) * 1000.0).max(0.0);
                            log::trace!("Round trip {rtt:.1} ms");
                            remote.round_trip_ms = Some(rtt);
                        }
                    }
                }
                ServerMessageKind::Error => {
                    let text = message
                        .error
                        .clone()
                        .or_else(|| message.message.clone())
                        .unwrap_or_else(|| "unspecified server error".to_owned());
                    log::warn!("Server error: {text}");
                    remote.last_error = Some(text);
                }
            }
        }

        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer(&message);
        }
    }

    fn reset_counters(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_acked.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
    }
}

/// Cheap, cloneable access to a [`TransportSession`]'s connection.
#[derive(Clone)]
pub struct TransportHandle(Arc<Shared>);

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.0.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.0.state.subscribe()
    }

    /// Every state change in order, unlike [`subscribe_state`](Self::subscribe_state)
    /// which only keeps the latest.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.0.transitions.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Never blocks or queues: returns false and drops the frame unless the
    /// connection is open and the writer has room.
    pub fn send_frame(&self, packet: FramePacket) -> bool {
        self.0.send_frame(packet)
    }

    /// Best effort. Not retried.
    pub fn send_control(&self, command: ControlCommand) -> bool {
        self.0.send_control(command)
    }

    pub fn on_message(&self, observer: MessageObserver) {
        self.0.observers.lock().push(observer);
    }

    pub fn counters(&self) -> TransportCounters {
        TransportCounters {
            frames_sent: self.0.frames_sent.load(Ordering::Relaxed),
            frames_acked: self.0.frames_acked.load(Ordering::Relaxed),
            frames_dropped: self.0.frames_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.0.reset_counters();
    }

    pub fn client_id(&self) -> Option<String> {
        self.0.remote.lock().client_id.clone()
    }

    pub fn server_stats(&self) -> Option<SessionStats> {
        self.0.remote.lock().server_stats.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.0.remote.lock().last_error.clone()
    }

    pub fn round_trip_ms(&self) -> Option<f64> {
        self.0.remote.lock().round_trip_ms
    }

    pub fn session_id(&self) -> Option<String> {
        self.0.remote.lock().session_id.clone()
    }

    /// Reconnect attempts since the connection was last open.
    pub fn attempts(&self) -> u32 {
        self.0.link.lock().attempts
    }
}

/// Owns one logical connection to the server.
///
/// Dropping the session tears it down: the socket is closed and no timer
/// survives it.
pub struct TransportSession {
    handle: TransportHandle,
}

impl TransportSession {
    pub fn new(connector: Arc<dyn Connector>, config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            handle: TransportHandle(Arc::new(Shared {
                connector,
                config,
                link: Mutex::new(LinkState::default()),
                state,
                transitions,
                remote: Mutex::new(RemoteStatus::default()),
                observers: Mutex::new(Vec::new()),
                frames_sent: AtomicU64::new(0),
                frames_acked: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
            })),
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Replaces any existing connection with one to `ws://host:port`.
    /// Only an unusable endpoint fails here; connection failures go through
    /// the reconnect policy.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        let shared = &self.handle.0;
        let endpoint = match Endpoint::new(host, port) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                log::error!("{e}");
                let mut link = shared.link.lock();
                link.epoch += 1;
                link.close();
                shared.set_state(ConnectionState::Error);
                return Err(e);
            }
        };

        let url = endpoint.url();
        let mut link = shared.link.lock();
        link.close();
        link.epoch += 1;
        link.attempts = 0;
        link.url = Some(url.clone());
        shared.set_state(ConnectionState::Connecting);
        let epoch = link.epoch;
        link.connection = Some(shared.open(epoch, url));
        Ok(())
    }

    /// Closes the connection and cancels any pending reconnect.
    pub fn disconnect(&self) {
        let shared = &self.handle.0;
        {
            let mut link = shared.link.lock();
            link.epoch += 1;
            link.attempts = shared.config.max_attempts;
            link.close();
            shared.set_state(ConnectionState::Disconnected);
        }

        let mut remote = shared.remote.lock();
        remote.client_id = None;
        remote.server_stats = None;
        remote.session_id = None;
        log::info!("Disconnected");
    }

    pub fn teardown(&self) {
        self.disconnect();
        self.handle.0.observers.lock().clear();
    }
}

impl Deref for TransportSession {
    type Target = TransportHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
