use std::collections::VecDeque;

use tokio::time::Instant;

use framecast::SessionStats;
use framecast::protocol::wall_clock_secs;

struct ActiveSession {
    id: String,
    started: Instant,
    frame_count: u64,
    total_bytes: u64,
    latencies: VecDeque<f64>,
}

/// Statistics for the session currently being received. At most one session
/// is active; creating a new one replaces it.
pub struct SessionTracker {
    latency_window: usize,
    current: Option<ActiveSession>,
}

impl SessionTracker {
    pub fn new(latency_window: usize) -> Self {
        Self {
            latency_window: latency_window.max(1),
            current: None,
        }
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.id.as_str())
    }

    /// Starts a session named `requested`, or a timestamped name when absent.
    pub fn create_session(&mut self, requested: Option<String>) -> String {
        let id = requested.unwrap_or_else(|| session_name(wall_clock_secs() as u64));
        if let Some(previous) = &self.current {
            log::info!("Replacing session {} with {id}", previous.id);
        }
        self.current = Some(ActiveSession {
            id: id.clone(),
            started: Instant::now(),
            frame_count: 0,
            total_bytes: 0,
            latencies: VecDeque::with_capacity(self.latency_window),
        });
        id
    }

    /// Counts one received frame, opening a session first if none is active.
    pub fn record_frame(&mut self, bytes: usize, latency_ms: f64) {
        if self.current.is_none() {
            self.create_session(None);
        }
        let window = self.latency_window;
        if let Some(session) = self.current.as_mut() {
            session.frame_count += 1;
            session.total_bytes += bytes as u64;
            if session.latencies.len() == window {
                session.latencies.pop_front();
            }
            session.latencies.push_back(latency_ms);
        }
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.current.as_ref().map(|session| {
            let duration = session.started.elapsed().as_secs_f64();
            let per_second = |value: f64| if duration > 0.0 { value / duration } else { 0.0 };
            let avg_latency = if session.latencies.is_empty() {
                0.0
            } else {
                session.latencies.iter().sum::<f64>() / session.latencies.len() as f64
            };

            SessionStats {
                session_id: Some(session.id.clone()),
                frame_count: session.frame_count,
                duration_secs: round2(duration),
                fps: round2(per_second(session.frame_count as f64)),
                avg_latency_ms: round2(avg_latency),
                bandwidth_mbps: round2(per_second(session.total_bytes as f64 * 8.0) / 1e6),
                total_mb: round2(session.total_bytes as f64 / (1024.0 * 1024.0)),
                queue_depth: 0,
            }
        })
    }

    /// Closes the active session and returns its final statistics.
    pub fn end_session(&mut self) -> Option<SessionStats> {
        let stats = self.stats();
        self.current = None;
        stats
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `session_YYYYMMDD_HHMMSS` for the given unix time, in UTC.
pub fn session_name(unix_secs: u64) -> String {
    let days = (unix_secs / 86_400) as i64;
    let secs_of_day = unix_secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "session_{year:04}{month:02}{day:02}_{:02}{:02}{:02}",
        secs_of_day / 3600,
        secs_of_day / 60 % 60,
        secs_of_day % 60
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_session_names() {
        assert_eq!(session_name(0), "session_19700101_000000");
        assert_eq!(session_name(1_700_000_000), "session_20231114_221320");
        assert_eq!(session_name(951_782_400), "session_20000229_000000");
    }

    #[test]
    fn test_no_session_means_no_stats() {
        let mut tracker = SessionTracker::new(100);
        assert!(tracker.stats().is_none());
        assert!(tracker.end_session().is_none());
        assert!(tracker.current_session().is_none());
    }

    #[test]
    fn test_requested_name_is_kept() {
        let mut tracker = SessionTracker::new(100);
        assert_eq!(tracker.create_session(Some("bench".into())), "bench");
        assert_eq!(tracker.current_session(), Some("bench"));

        let generated = tracker.create_session(None);
        assert!(generated.starts_with("session_"));
        assert_eq!(tracker.current_session(), Some(generated.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_over_two_seconds() {
        let mut tracker = SessionTracker::new(100);
        tracker.create_session(Some("s".into()));
        for _ in 0..20 {
            tracker.record_frame(131_072, 40.0);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.session_id.as_deref(), Some("s"));
        assert_eq!(stats.frame_count, 20);
        assert_eq!(stats.duration_secs, 2.0);
        assert_eq!(stats.fps, 10.0);
        assert_eq!(stats.avg_latency_ms, 40.0);
        assert_eq!(stats.total_mb, 2.5);
        // 2.5 MiB in 2 s
        assert_eq!(stats.bandwidth_mbps, 10.49);
        assert_eq!(stats.queue_depth, 0);
    }

    #[test]
    fn test_latency_average_covers_recent_frames_only() {
        let mut tracker = SessionTracker::new(4);
        for latency in [1000.0, 1000.0, 10.0, 20.0, 30.0, 40.0] {
            tracker.record_frame(10, latency);
        }
        assert_eq!(tracker.stats().unwrap().avg_latency_ms, 25.0);
    }

    #[test]
    fn test_frame_without_session_opens_one() {
        let mut tracker = SessionTracker::new(100);
        tracker.record_frame(10, 5.0);
        assert!(tracker.current_session().is_some());

        let stats = tracker.end_session().unwrap();
        assert_eq!(stats.frame_count, 1);
        assert!(tracker.current_session().is_none());
    }
}
