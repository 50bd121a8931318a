use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::CaptureCounters;
use crate::protocol::{ServerMessage, SessionStats};
use crate::transport::TransportHandle;

#[derive(Debug, Default)]
struct Observed {
    server: Option<SessionStats>,
    session_id: Option<String>,
}

/// Remembers what the server last said about the session, so a final
/// report survives the connection going away.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    observed: Arc<Mutex<Observed>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, message: &ServerMessage) {
        let mut observed = self.observed.lock();
        if let Some(stats) = &message.stats {
            observed.server = Some(stats.clone());
            if stats.session_id.is_some() {
                observed.session_id = stats.session_id.clone();
            }
        }
        if message.session_id.is_some() {
            observed.session_id = message.session_id.clone();
        }
    }

    pub fn last_server_stats(&self) -> Option<SessionStats> {
        self.observed.lock().server.clone()
    }

    pub fn snapshot(
        &self,
        capture: &CaptureCounters,
        transport: &TransportHandle,
    ) -> StatsSnapshot {
        let observed = self.observed.lock();
        let counters = transport.counters();
        StatsSnapshot {
            frames_captured: capture.frame_count,
            local_fps: capture.measured_fps,
            last_frame_bytes: capture.last_frame_bytes,
            frames_sent: counters.frames_sent,
            frames_acked: counters.frames_acked,
            frames_dropped: counters.frames_dropped,
            round_trip_ms: transport.round_trip_ms(),
            session_id: observed.session_id.clone(),
            server: observed.server.clone(),
        }
    }

    pub fn reset(&self) {
        *self.observed.lock() = Observed::default();
    }
}

/// Local and server-side view of a session at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub local_fps: f64,
    pub last_frame_bytes: usize,
    pub frames_sent: u64,
    pub frames_acked: u64,
    pub frames_dropped: u64,
    pub round_trip_ms: Option<f64>,
    pub session_id: Option<String>,
    pub server: Option<SessionStats>,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames {} ({:.1} fps, {:.1} KB) | sent {} acked {} dropped {}",
            self.frames_captured,
            self.local_fps,
            self.last_frame_bytes as f64 / 1024.0,
            self.frames_sent,
            self.frames_acked,
            self.frames_dropped
        )?;
        if let Some(server) = &self.server {
            write!(
                f,
                " | server {:.1} fps, {:.0} ms latency, queue {}, {:.1} MB",
                server.fps, server.avg_latency_ms, server.queue_depth, server.total_mb
            )?;
        }
        if let Some(rtt) = self.round_trip_ms {
            write!(f, " | rtt {rtt:.0} ms")?;
        }
        Ok(())
    }
}
