use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    InertialSample, InertialSensor, SensorChannel, SensorError, SensorListener, SensorPlatform,
    Subscription,
};
use crate::protocol::wall_clock_secs;

/// Caches the freshest inertial reading from a [`SensorPlatform`].
///
/// Every platform callback replaces the whole cached sample with one field
/// changed, so a reader never sees a half-written sample.
pub struct SensorSampler {
    platform: Arc<dyn SensorPlatform>,
    latest: Arc<Mutex<InertialSample>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SensorSampler {
    pub fn new(platform: Arc<dyn SensorPlatform>) -> Self {
        Self {
            platform,
            latest: Arc::new(Mutex::new(InertialSample::default())),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    fn listener(&self) -> SensorListener {
        let latest = Arc::clone(&self.latest);
        Arc::new(move |reading| {
            let mut sample = latest.lock();
            *sample = sample.with_reading(reading, wall_clock_secs());
        })
    }
}

impl InertialSensor for SensorSampler {
    fn start(&self, rate_hz: f32) {
        self.stop();

        let mut subscribed = Vec::with_capacity(SensorChannel::ALL.len());
        for channel in SensorChannel::ALL {
            match self.platform.subscribe(channel, rate_hz, self.listener()) {
                Ok(subscription) => subscribed.push(subscription),
                Err(SensorError::Unavailable(SensorChannel::Orientation)) => {
                    log::info!("No orientation sensor, frames carry identity orientation");
                }
                Err(e) => log::warn!("Sensor subscription failed: {e}"),
            }
        }

        log::debug!(
            "Sampling {} inertial channel(s) at {rate_hz} Hz",
            subscribed.len()
        );
        *self.subscriptions.lock() = subscribed;
    }

    fn stop(&self) {
        // Release outside the lock; platforms may call back while removing.
        let released = std::mem::take(&mut *self.subscriptions.lock());
        drop(released);
    }

    fn read_latest(&self) -> InertialSample {
        *self.latest.lock()
    }
}

impl Drop for SensorSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{EulerAngles, SensorReading};
    use crate::sim::ManualSensorPlatform;
    use glam::{Quat, Vec3};

    #[test]
    fn test_start_subscribes_every_channel() {
        let platform = Arc::new(ManualSensorPlatform::new());
        let sampler = SensorSampler::new(platform.clone());

        sampler.start(100.0);
        for channel in SensorChannel::ALL {
            assert_eq!(platform.listener_count(channel), 1);
        }
        assert_eq!(platform.last_rate(), Some(100.0));

        // restarting replaces rather than stacks listeners
        sampler.start(50.0);
        assert_eq!(platform.listener_count(SensorChannel::Gyroscope), 1);

        sampler.stop();
        assert_eq!(platform.listener_count(SensorChannel::Gyroscope), 0);
        assert!(!sampler.is_active());
    }

    #[test]
    fn test_latest_reading_wins() {
        let platform = Arc::new(ManualSensorPlatform::new());
        let sampler = SensorSampler::new(platform.clone());
        sampler.start(100.0);

        platform.emit(
            SensorChannel::Accelerometer,
            SensorReading::Acceleration(Vec3::new(0.1, 0.0, -9.8)),
        );
        platform.emit(
            SensorChannel::Accelerometer,
            SensorReading::Acceleration(Vec3::new(0.2, 0.0, -9.7)),
        );
        platform.emit(
            SensorChannel::Orientation,
            SensorReading::Euler(EulerAngles::default()),
        );

        let sample = sampler.read_latest();
        assert_eq!(sample.accel, Vec3::new(0.2, 0.0, -9.7));
        assert_eq!(sample.gyro, Vec3::ZERO);
        assert_eq!(sample.orientation, Quat::IDENTITY);
        assert!(sample.timestamp > 0.0);
    }

    #[test]
    fn test_missing_orientation_keeps_identity() {
        let platform = Arc::new(ManualSensorPlatform::new());
        platform.mark_unavailable(SensorChannel::Orientation);
        let sampler = SensorSampler::new(platform.clone());

        sampler.start(100.0);
        assert_eq!(platform.listener_count(SensorChannel::Accelerometer), 1);
        assert_eq!(platform.listener_count(SensorChannel::Orientation), 0);
        assert_eq!(sampler.read_latest().orientation, Quat::IDENTITY);
    }

    #[test]
    fn test_readings_after_stop_are_not_delivered() {
        let platform = Arc::new(ManualSensorPlatform::new());
        let sampler = SensorSampler::new(platform.clone());
        sampler.start(100.0);
        sampler.stop();

        platform.emit(
            SensorChannel::Gyroscope,
            SensorReading::AngularRate(Vec3::ONE),
        );
        assert_eq!(sampler.read_latest().gyro, Vec3::ZERO);
    }
}
