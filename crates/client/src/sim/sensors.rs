use std::f32::consts::TAU;
use std::time::Duration;

use glam::Vec3;
use rand::Rng;

use framecast::{
    EulerAngles, ScheduledTask, SensorChannel, SensorError, SensorListener, SensorPlatform,
    SensorReading, Subscription,
};

const GRAVITY: Vec3 = Vec3::new(0.0, 0.0, -9.81);

/// Inertial source for hosts without motion hardware: gravity and a slow
/// yaw sweep with uniform noise on every axis. Each subscription runs its
/// own timer task.
#[derive(Debug, Clone)]
pub struct NoisySensorPlatform {
    noise: f32,
    /// Radians per second.
    yaw_rate: f32,
}

impl Default for NoisySensorPlatform {
    fn default() -> Self {
        Self {
            noise: 0.05,
            yaw_rate: 10f32.to_radians(),
        }
    }
}

impl NoisySensorPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn reading(&self, channel: SensorChannel, elapsed: f32) -> SensorReading {
        match channel {
            SensorChannel::Accelerometer => SensorReading::Acceleration(GRAVITY + self.jitter()),
            SensorChannel::Gyroscope => {
                SensorReading::AngularRate(Vec3::new(0.0, 0.0, self.yaw_rate) + self.jitter())
            }
            SensorChannel::Orientation => {
                let wobble = self.jitter() * 0.1;
                let yaw = (self.yaw_rate * elapsed) % TAU;
                SensorReading::Euler(EulerAngles::new(yaw, wobble.x, wobble.y))
            }
        }
    }

    fn jitter(&self) -> Vec3 {
        let mut rng = rand::thread_rng();
        let n = self.noise;
        Vec3::new(
            rng.gen_range(-n..=n),
            rng.gen_range(-n..=n),
            rng.gen_range(-n..=n),
        )
    }
}

impl SensorPlatform for NoisySensorPlatform {
    fn subscribe(
        &self,
        channel: SensorChannel,
        rate_hz: f32,
        listener: SensorListener,
    ) -> Result<Subscription, SensorError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(SensorError::Subscribe {
                channel,
                reason: format!("unsupported rate {rate_hz} Hz"),
            });
        }

        let period = Duration::from_secs_f32(1.0 / rate_hz);
        let source = self.clone();
        let task = ScheduledTask::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut elapsed = 0.0;
            loop {
                ticker.tick().await;
                listener(source.reading(channel, elapsed));
                elapsed += period.as_secs_f32();
            }
        });
        log::debug!("Synthetic {channel} at {rate_hz} Hz");
        Ok(Subscription::new(move || task.cancel()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_emits_at_requested_rate_until_dropped() {
        let platform = NoisySensorPlatform::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let subscription = platform
            .subscribe(
                SensorChannel::Accelerometer,
                50.0,
                Arc::new(move |reading: SensorReading| {
                    if let SensorReading::Acceleration(accel) = reading {
                        assert!((accel.z + 9.81).abs() <= 0.05 + f32::EPSILON);
                    }
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(990)).await;
        assert_eq!(count.load(Ordering::SeqCst), 50);

        drop(subscription);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let platform = NoisySensorPlatform::new();
        let listener: SensorListener = Arc::new(|_| {});
        let result = platform.subscribe(SensorChannel::Gyroscope, 0.0, listener);
        assert!(matches!(result, Err(SensorError::Subscribe { .. })));
    }

    #[test]
    fn test_orientation_is_reported_as_euler_angles() {
        let platform = NoisySensorPlatform::new();
        match platform.reading(SensorChannel::Orientation, 1.0) {
            SensorReading::Euler(angles) => {
                assert!((angles.yaw - 10f32.to_radians()).abs() < 1e-6);
                assert!(angles.pitch.abs() <= 0.005 + f32::EPSILON);
            }
            other => panic!("unexpected reading {other:?}"),
        }
    }
}
