use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::ServerMessage;
use crate::transport::{Connector, Link, LinkGuard, TransportError};

const PEER_CAPACITY: usize = 64;

/// Server end of a loopback link. Dropping it looks like the server going
/// away.
#[derive(Debug)]
pub struct LoopbackPeer {
    pub from_client: mpsc::Receiver<String>,
    pub to_client: mpsc::Sender<String>,
}

impl LoopbackPeer {
    /// Next client message, or `None` once the client closed the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub async fn send(&self, text: impl Into<String>) {
        let _ = self.to_client.send(text.into()).await;
    }

    pub async fn send_message(&self, message: &ServerMessage) {
        if let Ok(text) = message.to_json() {
            self.send(text).await;
        }
    }
}

#[derive(Default)]
struct Dialer {
    refuse: bool,
    urls: Vec<String>,
    attempts: Vec<Instant>,
    peers: VecDeque<LoopbackPeer>,
}

/// In-memory connector. Every accepted connection leaves a [`LoopbackPeer`]
/// to be picked up with [`LoopbackConnector::take_peer`].
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    dialer: Arc<Mutex<Dialer>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.dialer.lock().refuse = refuse;
    }

    /// Oldest connection not yet picked up.
    pub fn take_peer(&self) -> Option<LoopbackPeer> {
        self.dialer.lock().peers.pop_front()
    }

    pub fn connect_count(&self) -> usize {
        self.dialer.lock().attempts.len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.dialer.lock().attempts.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.dialer.lock().urls.clone()
    }
}

impl Connector for LoopbackConnector {
    fn connect(
        &self,
        url: String,
        outbound_capacity: usize,
    ) -> BoxFuture<'static, Result<Link, TransportError>> {
        let result = {
            let mut dialer = self.dialer.lock();
            dialer.attempts.push(Instant::now());
            dialer.urls.push(url.clone());

            if dialer.refuse {
                Err(TransportError::Connect(format!("{url} refused the connection")))
            } else {
                let (outbound, from_client) = mpsc::channel(outbound_capacity.max(1));
                let (to_client, inbound) = mpsc::channel(PEER_CAPACITY);
                dialer.peers.push_back(LoopbackPeer {
                    from_client,
                    to_client,
                });
                Ok(Link {
                    outbound,
                    inbound,
                    guard: LinkGuard::default(),
                })
            }
        };
        Box::pin(async move { result })
    }
}
