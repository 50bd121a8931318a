use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::TransportError;
use crate::task::ScheduledTask;

const INBOUND_CAPACITY: usize = 64;

/// Keeps the I/O tasks behind a [`Link`] alive. Dropping it stops them.
#[derive(Debug, Default)]
pub struct LinkGuard {
    _tasks: Vec<ScheduledTask>,
}

impl LinkGuard {
    pub fn new(tasks: Vec<ScheduledTask>) -> Self {
        Self { _tasks: tasks }
    }
}

/// An open message connection as a pair of text channels.
///
/// Dropping `outbound` closes the connection cleanly; `inbound` ends when
/// the peer goes away.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
    pub guard: LinkGuard,
}

/// Opens connections for a [`TransportSession`](super::TransportSession).
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        url: String,
        outbound_capacity: usize,
    ) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: String,
        outbound_capacity: usize,
    ) -> BoxFuture<'static, Result<Link, TransportError>> {
        Box::pin(async move {
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (mut sink, mut source) = stream.split();

            let (outbound, mut outbound_rx) = mpsc::channel::<String>(outbound_capacity.max(1));
            let (inbound_tx, inbound) = mpsc::channel::<String>(INBOUND_CAPACITY);

            // Not guarded: it exits on its own once every sender is gone,
            // after sending a close frame.
            tokio::spawn(async move {
                while let Some(text) = outbound_rx.recv().await {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        log::warn!("WebSocket write failed: {e}");
                        return;
                    }
                }
                if let Err(e) = sink.close().await {
                    log::debug!("WebSocket close failed: {e}");
                }
            });

            let reader = ScheduledTask::spawn(async move {
                while let Some(message) = source.next().await {
                    let text = match message {
                        Ok(Message::Text(text)) => text.as_str().to_owned(),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                log::warn!("Ignoring non-UTF-8 binary message");
                                continue;
                            }
                        },
                        Ok(Message::Close(frame)) => {
                            log::debug!("Peer closed the connection: {frame:?}");
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            log::warn!("WebSocket read failed: {e}");
                            break;
                        }
                    };
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Link {
                outbound,
                inbound,
                guard: LinkGuard::new(vec![reader]),
            })
        })
    }
}
