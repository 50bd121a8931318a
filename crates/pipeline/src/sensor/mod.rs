//! Inertial sensing: the platform subscription seam, the cached
//! "freshest sample" and the capability the capture loop reads from.

mod orientation;
mod sampler;

use std::fmt;
use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::protocol::ImuPayload;

pub use orientation::{EulerAngles, euler_to_quaternion};
pub use sampler::SensorSampler;

pub const DEFAULT_SENSOR_RATE_HZ: f32 = 100.0;

/// One inertial reading. Replaced wholesale on every sensor update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    /// Linear acceleration, m/s².
    pub accel: Vec3,
    /// Angular rate, rad/s.
    pub gyro: Vec3,
    pub orientation: Quat,
    /// Wall-clock seconds of the most recent update.
    pub timestamp: f64,
}

impl Default for InertialSample {
    fn default() -> Self {
        Self {
            accel: Vec3::ZERO,
            gyro: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            timestamp: 0.0,
        }
    }
}

impl InertialSample {
    pub fn with_reading(self, reading: SensorReading, timestamp: f64) -> Self {
        let mut next = self;
        match reading {
            SensorReading::Acceleration(accel) => next.accel = accel,
            SensorReading::AngularRate(gyro) => next.gyro = gyro,
            SensorReading::Euler(angles) => next.orientation = euler_to_quaternion(angles),
            SensorReading::Orientation(orientation) => next.orientation = orientation,
        }
        next.timestamp = timestamp;
        next
    }

    /// Scalar-first `[w, x, y, z]`.
    pub fn orientation_wxyz(&self) -> [f32; 4] {
        let q = self.orientation;
        [q.w, q.x, q.y, q.z]
    }
}

impl From<InertialSample> for ImuPayload {
    fn from(sample: InertialSample) -> Self {
        ImuPayload {
            accel: sample.accel.to_array(),
            gyro: sample.gyro.to_array(),
            orientation: sample.orientation_wxyz(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    Accelerometer,
    Gyroscope,
    Orientation,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 3] = [
        SensorChannel::Accelerometer,
        SensorChannel::Gyroscope,
        SensorChannel::Orientation,
    ];
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorChannel::Accelerometer => "accelerometer",
            SensorChannel::Gyroscope => "gyroscope",
            SensorChannel::Orientation => "orientation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Acceleration(Vec3),
    AngularRate(Vec3),
    /// Platforms that only expose yaw/pitch/roll.
    Euler(EulerAngles),
    Orientation(Quat),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SensorError {
    #[error("{0} is not available on this device")]
    Unavailable(SensorChannel),
    #[error("subscribing to {channel} failed: {reason}")]
    Subscribe {
        channel: SensorChannel,
        reason: String,
    },
}

pub type SensorListener = Arc<dyn Fn(SensorReading) + Send + Sync>;

/// Keeps a platform listener registered. Dropping it removes the listener.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Per-axis listener registration offered by the device.
pub trait SensorPlatform: Send + Sync {
    fn subscribe(
        &self,
        channel: SensorChannel,
        rate_hz: f32,
        listener: SensorListener,
    ) -> Result<Subscription, SensorError>;
}

/// What the capture loop needs from inertial sensing.
pub trait InertialSensor: Send + Sync {
    /// Subscribes at `rate_hz`. Calling it again re-subscribes.
    fn start(&self, rate_hz: f32);
    fn stop(&self);
    /// Never blocks and never fails; before any data arrives this is a
    /// zeroed sample with identity orientation.
    fn read_latest(&self) -> InertialSample;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sample_is_zero_with_identity_orientation() {
        let payload = ImuPayload::from(InertialSample::default());
        assert_eq!(payload.accel, [0.0; 3]);
        assert_eq!(payload.gyro, [0.0; 3]);
        assert_eq!(payload.orientation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_readings_replace_only_their_field() {
        let sample = InertialSample::default()
            .with_reading(SensorReading::Acceleration(Vec3::new(0.0, 0.0, -9.8)), 1.0)
            .with_reading(SensorReading::AngularRate(Vec3::new(0.1, 0.2, 0.3)), 2.0);

        assert_eq!(sample.accel, Vec3::new(0.0, 0.0, -9.8));
        assert_eq!(sample.gyro, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(sample.orientation, Quat::IDENTITY);
        assert_eq!(sample.timestamp, 2.0);
    }

    #[test]
    fn test_subscription_releases_once_on_drop() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
