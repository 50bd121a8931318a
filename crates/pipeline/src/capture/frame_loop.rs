use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use super::counters::{CaptureCounters, CounterState};
use super::pacing::{CaptureGuard, CaptureLock, Pacing};
use super::{Camera, CaptureConfig, CaptureRequest, CaptureSettings};
use crate::protocol::{CameraIntrinsics, FramePacket, wall_clock_secs};
use crate::sensor::InertialSensor;
use crate::task::ScheduledTask;

/// Consumer of finished frames.
pub type FrameSink = Arc<dyn Fn(FramePacket) + Send + Sync>;

struct Shared {
    camera: Arc<dyn Camera>,
    sensor: Arc<dyn InertialSensor>,
    sink: FrameSink,
    config: Mutex<CaptureConfig>,
    counters: Mutex<CounterState>,
    lock: CaptureLock,
    /// Bumped whenever the pacer is replaced; results from older pacers
    /// are discarded.
    generation: AtomicU64,
}

impl Shared {
    fn begin_tick(&self) -> Option<CaptureGuard> {
        self.counters.lock().sample_fps(Instant::now());

        if !self.camera.is_ready() {
            log::trace!("Camera not ready, skipping tick");
            self.counters.lock().record_skip();
            return None;
        }
        let Some(guard) = self.lock.try_acquire() else {
            log::trace!("Capture still in flight, skipping tick");
            self.counters.lock().record_skip();
            return None;
        };
        Some(guard)
    }

    async fn capture_frame(self: Arc<Self>, generation: u64, guard: CaptureGuard) {
        let (request, fov) = {
            let config = self.config.lock();
            (
                CaptureRequest::from(&config.settings),
                config.horizontal_fov_deg,
            )
        };
        let timestamp = wall_clock_secs();
        let imu = self.sensor.read_latest();

        let result = self.camera.capture(request).await;
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }

        match result {
            Ok(image) => {
                let packet = FramePacket {
                    timestamp,
                    camera_intrinsics: CameraIntrinsics::from_dimensions(
                        image.width,
                        image.height,
                        fov,
                    ),
                    payload: image.data,
                    imu: imu.into(),
                };
                self.counters.lock().record_frame(packet.payload_len());
                (self.sink)(packet);
            }
            Err(e) => {
                log::warn!("Dropping capture tick: {e}");
                self.counters.lock().record_failure();
            }
        }
        drop(guard);
    }
}

async fn run_self_correcting(
    shared: Arc<Shared>,
    generation: u64,
    interval: Duration,
    min_delay: Duration,
) {
    loop {
        let tick_start = Instant::now();
        if let Some(guard) = shared.begin_tick() {
            Arc::clone(&shared).capture_frame(generation, guard).await;
        }
        let deadline = (tick_start + interval).max(Instant::now() + min_delay);
        tokio::time::sleep_until(deadline).await;
    }
}

async fn run_fixed_interval(shared: Arc<Shared>, generation: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Owned here so aborting the pacer aborts the capture with it.
    let mut _in_flight: Option<ScheduledTask> = None;
    loop {
        ticker.tick().await;
        if let Some(guard) = shared.begin_tick() {
            _in_flight = Some(ScheduledTask::spawn(
                Arc::clone(&shared).capture_frame(generation, guard),
            ));
        }
    }
}

/// Paces captures, attaches the freshest inertial sample and camera
/// intrinsics, and hands each finished [`FramePacket`] to the sink.
///
/// At most one capture is ever in flight. Ticks that find the camera busy or
/// not ready are skipped, not queued.
pub struct FrameCaptureLoop {
    shared: Arc<Shared>,
    pacer: Mutex<Option<ScheduledTask>>,
}

impl FrameCaptureLoop {
    pub fn new(
        camera: Arc<dyn Camera>,
        sensor: Arc<dyn InertialSensor>,
        config: CaptureConfig,
        sink: FrameSink,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                camera,
                sensor,
                sink,
                config: Mutex::new(config),
                counters: Mutex::new(CounterState::default()),
                lock: CaptureLock::default(),
                generation: AtomicU64::new(0),
            }),
            pacer: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn start_capture(&self) {
        let mut pacer = self.pacer.lock();
        if pacer.is_some() {
            log::debug!("Capture already running");
            return;
        }

        let config = self.shared.config.lock().clone();
        self.shared.sensor.start(config.sensor_rate_hz);
        self.shared.counters.lock().mark_started(Instant::now());
        *pacer = Some(self.spawn_pacer(&config));

        log::info!(
            "Capture started: {} fps, {}, quality {:.2}",
            config.settings.target_fps,
            config.settings.resolution,
            config.settings.quality
        );
    }

    pub fn stop_capture(&self) {
        let Some(pacer) = self.pacer.lock().take() else {
            return;
        };
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        pacer.cancel();
        self.shared.lock.release_all();
        self.shared.sensor.stop();

        log::info!(
            "Capture stopped after {} frames",
            self.shared.counters.lock().snapshot().frame_count
        );
    }

    pub fn is_running(&self) -> bool {
        self.pacer.lock().is_some()
    }

    /// Takes effect immediately; a running loop is re-paced without losing
    /// its counters.
    pub fn set_target_fps(&self, target_fps: u32) {
        let mut settings = self.settings();
        settings.target_fps = target_fps;
        self.set_settings(settings);
    }

    pub fn set_settings(&self, settings: CaptureSettings) {
        if let Err(e) = settings.validate() {
            log::warn!("Ignoring capture settings: {e}");
            return;
        }

        let config = {
            let mut config = self.shared.config.lock();
            let interval_changed = config.settings.target_fps != settings.target_fps;
            config.settings = settings;
            if !interval_changed {
                return;
            }
            config.clone()
        };

        let mut pacer = self.pacer.lock();
        if pacer.take().is_some() {
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            self.shared.lock.release_all();
            *pacer = Some(self.spawn_pacer(&config));
            log::info!("Capture re-paced to {} fps", settings.target_fps);
        }
    }

    pub fn settings(&self) -> CaptureSettings {
        self.shared.config.lock().settings
    }

    pub fn counters(&self) -> CaptureCounters {
        self.shared.counters.lock().snapshot()
    }

    pub fn reset_counters(&self) {
        let running = self.is_running();
        let mut counters = self.shared.counters.lock();
        *counters = CounterState::default();
        if running {
            counters.mark_started(Instant::now());
        }
    }

    fn spawn_pacer(&self, config: &CaptureConfig) -> ScheduledTask {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let shared = Arc::clone(&self.shared);
        let interval = config.settings.frame_interval();

        match config.pacing {
            Pacing::FixedInterval => {
                ScheduledTask::spawn(run_fixed_interval(shared, generation, interval))
            }
            Pacing::SelfCorrecting { min_delay } => ScheduledTask::spawn(run_self_correcting(
                shared, generation, interval, min_delay,
            )),
        }
    }
}

impl Drop for FrameCaptureLoop {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
