use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use super::state::{CaptureState, CaptureStateMachine, SessionError, SessionEvent};
use crate::capture::{Camera, CaptureConfig, CaptureSettings, FrameCaptureLoop, Resolution};
use crate::protocol::{ControlCommand, FramePacket, ServerMessage};
use crate::sensor::InertialSensor;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::task::ScheduledTask;
use crate::transport::{ConnectionState, TransportHandle};

/// Lets a frame through to the transport only while capturing and
/// connected. Everything else is discarded on the spot.
pub struct ForwardGate {
    machine: Arc<Mutex<CaptureStateMachine>>,
    transport: TransportHandle,
    forwarded: AtomicU64,
    discarded: AtomicU64,
}

impl ForwardGate {
    fn new(machine: Arc<Mutex<CaptureStateMachine>>, transport: TransportHandle) -> Self {
        Self {
            machine,
            transport,
            forwarded: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Returns whether the frame was handed to the transport.
    pub fn offer(&self, packet: FramePacket) -> bool {
        let capturing = self.machine.lock().state() == CaptureState::Capturing;
        if !capturing || !self.transport.is_connected() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.transport.send_frame(packet);
        true
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.forwarded.store(0, Ordering::Relaxed);
        self.discarded.store(0, Ordering::Relaxed);
    }
}

struct Inner {
    machine: Arc<Mutex<CaptureStateMachine>>,
    capture: FrameCaptureLoop,
    transport: TransportHandle,
    gate: Arc<ForwardGate>,
    stats: StatsAggregator,
}

impl Inner {
    fn transition(&self, event: SessionEvent) -> Result<CaptureState, SessionError> {
        self.machine.lock().try_transition(event)
    }

    fn state(&self) -> CaptureState {
        self.machine.lock().state()
    }

    fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.capture.counters(), &self.transport)
    }

    fn stop(&self) -> Result<StatsSnapshot, SessionError> {
        self.transition(SessionEvent::Stop)?;
        self.transport.send_control(ControlCommand::EndSession);
        self.capture.stop_capture();

        let snapshot = self.snapshot();
        log::info!("Session finished: {snapshot}");
        Ok(snapshot)
    }
}

async fn stop_on_connection_loss(
    inner: Weak<Inner>,
    mut transitions: broadcast::Receiver<ConnectionState>,
) {
    loop {
        let state = match transitions.recv().await {
            Ok(state) => state,
            // skipped transitions may have included a loss
            Err(RecvError::Lagged(missed)) => {
                log::debug!("Missed {missed} connection transitions");
                ConnectionState::Disconnected
            }
            Err(RecvError::Closed) => return,
        };
        if !matches!(state, ConnectionState::Disconnected | ConnectionState::Error) {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.state() != CaptureState::Idle {
            log::warn!("Connection {state}, ending capture session");
            if let Err(e) = inner.stop() {
                log::debug!("Session already stopped: {e}");
            }
        }
    }
}

/// Drives a capture session: the idle/capturing/paused lifecycle, the
/// matching control messages and the gate between capture and transport.
pub struct SessionController {
    inner: Arc<Inner>,
    watcher: Mutex<Option<ScheduledTask>>,
}

impl SessionController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        camera: Arc<dyn Camera>,
        sensor: Arc<dyn InertialSensor>,
        transport: TransportHandle,
        config: CaptureConfig,
    ) -> Self {
        let machine = Arc::new(Mutex::new(CaptureStateMachine::new()));
        let gate = Arc::new(ForwardGate::new(Arc::clone(&machine), transport.clone()));

        let sink_gate = Arc::clone(&gate);
        let capture = FrameCaptureLoop::new(
            camera,
            sensor,
            config,
            Arc::new(move |packet| {
                sink_gate.offer(packet);
            }),
        );

        let stats = StatsAggregator::new();
        let observer_stats = stats.clone();
        transport.on_message(Arc::new(move |message: &ServerMessage| {
            observer_stats.observe(message)
        }));

        let transitions = transport.subscribe_transitions();
        let inner = Arc::new(Inner {
            machine,
            capture,
            transport,
            gate,
            stats,
        });
        let watcher =
            ScheduledTask::spawn(stop_on_connection_loss(Arc::downgrade(&inner), transitions));

        Self {
            inner,
            watcher: Mutex::new(Some(watcher)),
        }
    }

    pub fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        inner.transition(SessionEvent::Start)?;
        inner.transport.send_control(ControlCommand::StartSession);

        inner.capture.reset_counters();
        inner.transport.reset_counters();
        inner.gate.reset();
        inner.stats.reset();
        inner.capture.start_capture();
        log::info!("Session started");
        Ok(())
    }

    /// Stops capturing; the connection stays open.
    pub fn pause(&self) -> Result<(), SessionError> {
        self.inner.transition(SessionEvent::Pause)?;
        self.inner.transport.send_control(ControlCommand::Pause);
        self.inner.capture.stop_capture();
        log::info!("Session paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.inner.transition(SessionEvent::Resume)?;
        self.inner.transport.send_control(ControlCommand::Resume);
        self.inner.capture.start_capture();
        log::info!("Session resumed");
        Ok(())
    }

    /// Ends the session and reports the last known statistics.
    pub fn stop(&self) -> Result<StatsSnapshot, SessionError> {
        self.inner.stop()
    }

    pub fn state(&self) -> CaptureState {
        self.inner.state()
    }

    pub fn settings(&self) -> CaptureSettings {
        self.inner.capture.settings()
    }

    /// Only while idle.
    pub fn update_settings(&self, settings: CaptureSettings) -> Result<(), SessionError> {
        let machine = self.inner.machine.lock();
        if machine.state() != CaptureState::Idle {
            return Err(SessionError::SettingsLocked(machine.state()));
        }
        settings.validate()?;
        self.inner.capture.set_settings(settings);
        Ok(())
    }

    pub fn set_target_fps(&self, target_fps: u32) -> Result<(), SessionError> {
        self.update_settings(CaptureSettings {
            target_fps,
            ..self.settings()
        })
    }

    pub fn set_resolution(&self, resolution: Resolution) -> Result<(), SessionError> {
        self.update_settings(CaptureSettings {
            resolution,
            ..self.settings()
        })
    }

    pub fn set_quality(&self, quality: f32) -> Result<(), SessionError> {
        self.update_settings(CaptureSettings {
            quality,
            ..self.settings()
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.snapshot()
    }

    pub fn forwarded_count(&self) -> u64 {
        self.inner.gate.forwarded()
    }

    pub fn discarded_count(&self) -> u64 {
        self.inner.gate.discarded()
    }

    /// Stops any running session and the connection watcher.
    pub fn teardown(&self) {
        self.watcher.lock().take();
        if self.state() != CaptureState::Idle {
            let _ = self.inner.stop();
        }
        self.inner.capture.stop_capture();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}
