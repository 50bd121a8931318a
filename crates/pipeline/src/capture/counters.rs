use std::time::Duration;

use tokio::time::Instant;

const FPS_SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// Read-only view of the capture loop's counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CaptureCounters {
    pub frame_count: u64,
    /// Frames completed over seconds since capture start, refreshed every
    /// 500 ms.
    pub measured_fps: f64,
    pub last_frame_bytes: usize,
    pub skipped_ticks: u64,
    pub failed_captures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CounterState {
    counters: CaptureCounters,
    started_at: Option<Instant>,
    last_fps_sample: Option<Instant>,
}

impl CounterState {
    pub fn snapshot(&self) -> CaptureCounters {
        self.counters
    }

    /// Keeps the original start across pause/resume.
    pub fn mark_started(&mut self, now: Instant) {
        self.started_at.get_or_insert(now);
    }

    pub fn record_frame(&mut self, bytes: usize) {
        self.counters.frame_count += 1;
        self.counters.last_frame_bytes = bytes;
    }

    pub fn record_skip(&mut self) {
        self.counters.skipped_ticks += 1;
    }

    pub fn record_failure(&mut self) {
        self.counters.failed_captures += 1;
    }

    pub fn sample_fps(&mut self, now: Instant) {
        let Some(started_at) = self.started_at else {
            return;
        };
        if self
            .last_fps_sample
            .is_some_and(|last| now.duration_since(last) < FPS_SAMPLE_PERIOD)
        {
            return;
        }
        self.last_fps_sample = Some(now);

        let elapsed = now.duration_since(started_at).as_secs_f64();
        if elapsed > 0.0 {
            self.counters.measured_fps = self.counters.frame_count as f64 / elapsed;
        }
    }
}
