use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::capture::{Camera, CaptureError, CaptureRequest, CapturedImage};

/// JPEG start and end markers around a counter, enough to look like a frame.
fn fake_jpeg(sequence: u64) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&sequence.to_be_bytes());
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

#[derive(Debug, Default)]
struct Activity {
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    overlaps: AtomicU32,
}

/// Decrements the in-flight count however the capture future ends.
struct InFlight(Arc<Activity>);

impl InFlight {
    fn enter(activity: &Arc<Activity>) -> Self {
        let now = activity.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if now > 1 {
            activity.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        activity.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(activity))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Camera with configurable latency, readiness, failures and output size.
#[derive(Debug)]
pub struct ScriptedCamera {
    latency: Mutex<Duration>,
    ready: AtomicBool,
    fail_remaining: AtomicU32,
    dimensions: Mutex<Option<(u32, u32)>>,
    last_request: Mutex<Option<CaptureRequest>>,
    captures: AtomicU64,
    activity: Arc<Activity>,
}

impl Default for ScriptedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCamera {
    pub fn new() -> Self {
        Self {
            latency: Mutex::new(Duration::ZERO),
            ready: AtomicBool::new(true),
            fail_remaining: AtomicU32::new(0),
            dimensions: Mutex::new(None),
            last_request: Mutex::new(None),
            captures: AtomicU64::new(0),
            activity: Arc::new(Activity::default()),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Report this size instead of the requested one.
    pub fn with_dimensions(self, width: u32, height: u32) -> Self {
        *self.dimensions.lock() = Some((width, height));
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Captures started.
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.activity.max_in_flight.load(Ordering::SeqCst)
    }

    /// Captures started while another was still running.
    pub fn overlaps(&self) -> u32 {
        self.activity.overlaps.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        *self.last_request.lock()
    }
}

impl Camera for ScriptedCamera {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn capture(
        &self,
        request: CaptureRequest,
    ) -> BoxFuture<'static, Result<CapturedImage, CaptureError>> {
        let sequence = self.captures.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);
        let latency = *self.latency.lock();
        let fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let (width, height) = self
            .dimensions
            .lock()
            .unwrap_or((request.width, request.height));
        let in_flight = InFlight::enter(&self.activity);

        Box::pin(async move {
            let _in_flight = in_flight;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if fail {
                return Err(CaptureError::Failed("scripted failure".to_owned()));
            }
            Ok(CapturedImage {
                data: fake_jpeg(sequence),
                width,
                height,
            })
        })
    }
}
