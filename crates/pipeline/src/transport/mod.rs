//! Client side of the streaming connection: connection state machine,
//! reconnect with exponential backoff, drop-on-backpressure frame sends.

mod connector;
mod session;

use std::fmt;
use std::time::Duration;

pub use connector::{Connector, Link, LinkGuard, WsConnector};
pub use session::{MessageObserver, TransportHandle, TransportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint {host:?}:{port}")]
    InvalidEndpoint { host: String, port: u16 },
    #[error("connection failed: {0}")]
    Connect(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Messages the socket writer may hold before frames are dropped.
    pub outbound_capacity: usize,
    /// Sends a `ping` on this period while connected.
    pub ping_interval: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            outbound_capacity: 2,
            ping_interval: None,
        }
    }
}

/// Wait before reconnect attempt `attempt` (1-based): `base × 2^(attempt−1)`.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        let host = host.trim();
        let valid = !host.is_empty()
            && port != 0
            && !host.chars().any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#');
        if !valid {
            return Err(TransportError::InvalidEndpoint {
                host: host.to_owned(),
                port,
            });
        }
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportCounters {
    pub frames_sent: u64,
    /// Server-reported count from the latest `ack`.
    pub frames_acked: u64,
    /// Frames refused because the writer was still busy.
    pub frames_dropped: u64,
}
