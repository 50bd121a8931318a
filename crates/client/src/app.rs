use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::time::timeout;

use framecast::{
    Camera, CaptureState, ConnectionState, Connector, SensorPlatform, SensorSampler,
    SessionController, StatsSnapshot, TransportSession, WsConnector,
};

use crate::config::ClientConfig;
use crate::sim::{NoisySensorPlatform, SyntheticCamera};

// lets the server see end_session before the socket closes
const DRAIN_DELAY: Duration = Duration::from_millis(200);

pub struct App {
    config: ClientConfig,
    transport: TransportSession,
    controller: SessionController,
}

impl App {
    pub fn new(config: ClientConfig) -> Self {
        let camera = Arc::new(SyntheticCamera::new(config.camera_latency));
        Self::with_parts(
            config,
            camera,
            Arc::new(NoisySensorPlatform::new()),
            Arc::new(WsConnector),
        )
    }

    pub fn with_parts(
        config: ClientConfig,
        camera: Arc<dyn Camera>,
        platform: Arc<dyn SensorPlatform>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let transport = TransportSession::new(connector, config.transport.clone());
        let controller = SessionController::new(
            camera,
            Arc::new(SensorSampler::new(platform)),
            transport.handle(),
            config.capture.clone(),
        );
        Self {
            config,
            transport,
            controller,
        }
    }

    /// Connects, streams until the configured duration elapses, `interrupt`
    /// resolves or the connection is given up, then reports and disconnects.
    pub async fn run(&self, interrupt: impl Future<Output = ()>) -> Result<StatsSnapshot> {
        let (host, port) = (self.config.host.as_str(), self.config.port);
        self.transport
            .connect(host, port)
            .with_context(|| format!("cannot connect to {host}:{port}"))?;
        self.wait_for_connection().await?;
        log::info!("Connected to ws://{host}:{port}");

        self.controller.start()?;
        let settings = self.controller.settings();
        log::info!(
            "Streaming {} at {} fps, quality {:.2}",
            settings.resolution,
            settings.target_fps,
            settings.quality
        );

        let gave_up = self.stream(interrupt).await;

        let stats = if self.controller.state() == CaptureState::Idle {
            self.controller.stats()
        } else {
            let stats = self.controller.stop()?;
            tokio::time::sleep(DRAIN_DELAY).await;
            stats
        };
        log::info!("Final: {stats}");
        if let Some(session_id) = &stats.session_id {
            log::info!("Server session {session_id}");
        }
        self.transport.disconnect();

        if gave_up {
            let reason = self.transport.last_error().unwrap_or_else(|| "retries exhausted".into());
            bail!("lost connection to the server: {reason}");
        }
        Ok(stats)
    }

    async fn wait_for_connection(&self) -> Result<()> {
        let mut states = self.transport.subscribe_state();
        let state = *timeout(
            self.config.connect_timeout,
            states.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Error)),
        )
        .await
        .context("timed out waiting for the server")?
        .context("transport shut down")?;

        if state == ConnectionState::Error {
            bail!("server unreachable after {} attempts", self.transport.attempts());
        }
        Ok(())
    }

    /// Returns true when the transport gave up on the server.
    async fn stream(&self, interrupt: impl Future<Output = ()>) -> bool {
        let mut report = tokio::time::interval(self.config.report_interval);
        report.tick().await;
        let mut states = self.transport.subscribe_state();
        let duration = self.config.duration;
        let deadline = async move {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                _ = report.tick() => log::info!("{}", self.controller.stats()),
                _ = &mut deadline => {
                    log::info!("Capture duration reached");
                    return false;
                }
                _ = &mut interrupt => {
                    log::info!("Interrupted");
                    return false;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    let state = *states.borrow_and_update();
                    match state {
                        ConnectionState::Error => return true,
                        ConnectionState::Reconnecting => {
                            log::warn!("Connection lost, attempt {}", self.transport.attempts());
                        }
                        _ => log::info!("Connection {state}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use framecast::sim::{LoopbackConnector, ManualSensorPlatform, ScriptedCamera};
    use framecast::{CaptureConfig, CaptureSettings, ClientMessage, ControlCommand};

    use super::*;

    fn config(duration: Option<Duration>) -> ClientConfig {
        ClientConfig {
            capture: CaptureConfig {
                settings: CaptureSettings {
                    target_fps: 10,
                    ..Default::default()
                },
                ..Default::default()
            },
            duration,
            ..Default::default()
        }
    }

    fn app(connector: &Arc<LoopbackConnector>, duration: Option<Duration>) -> App {
        App::with_parts(
            config(duration),
            Arc::new(ScriptedCamera::new()),
            Arc::new(ManualSensorPlatform::new()),
            connector.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_for_configured_duration() {
        let connector = Arc::new(LoopbackConnector::new());
        let app = app(&connector, Some(Duration::from_millis(999)));

        let peer_connector = connector.clone();
        let peer = tokio::spawn(async move {
            loop {
                if let Some(mut peer) = peer_connector.take_peer() {
                    let mut received = Vec::new();
                    while let Some(text) = peer.recv().await {
                        received.push(ClientMessage::from_json(&text).unwrap());
                    }
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let stats = app.run(std::future::pending()).await.unwrap();
        assert_eq!(stats.frames_captured, 10);

        let received = peer.await.unwrap();
        let frames = received
            .iter()
            .filter(|m| matches!(m, ClientMessage::Frame(_)))
            .count();
        assert_eq!(frames, 10);
        assert!(matches!(
            received.last(),
            Some(ClientMessage::Control(control)) if control.command == ControlCommand::EndSession
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_streaming() {
        let connector = Arc::new(LoopbackConnector::new());
        let app = app(&connector, None);

        let stats = app
            .run(tokio::time::sleep(Duration::from_millis(450)))
            .await
            .unwrap();
        assert_eq!(app.controller.state(), CaptureState::Idle);
        assert!(stats.frames_captured >= 4);
        assert_eq!(app.transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_is_an_error() {
        let connector = Arc::new(LoopbackConnector::new());
        connector.refuse_connections(true);
        let app = app(&connector, Some(Duration::from_secs(1)));

        let result = app.run(std::future::pending()).await;
        assert!(result.is_err());
        assert_eq!(app.controller.state(), CaptureState::Idle);
    }
}
