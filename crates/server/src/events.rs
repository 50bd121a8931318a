use std::net::SocketAddr;

use framecast::SessionStats;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: String,
        addr: SocketAddr,
    },
    ClientDisconnected {
        client_id: String,
        reason: DisconnectReason,
        remaining: usize,
    },
    SessionStarted {
        session_id: String,
    },
    SessionEnded {
        stats: SessionStats,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Dropped,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Dropped => "dropped",
        }
    }
}
