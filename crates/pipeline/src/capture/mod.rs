//! Paced camera capture: one frame per tick, never two at once.

mod camera;
mod counters;
mod frame_loop;
mod pacing;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use camera::{Camera, CaptureError, CaptureRequest, CapturedImage};
pub use counters::CaptureCounters;
pub use frame_loop::{FrameCaptureLoop, FrameSink};
pub use pacing::Pacing;

use crate::sensor::DEFAULT_SENSOR_RATE_HZ;

pub const MAX_TARGET_FPS: u32 = 60;
pub const DEFAULT_HORIZONTAL_FOV_DEG: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    Sd480,
    #[default]
    Hd720,
    Hd1080,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Sd480, Resolution::Hd720, Resolution::Hd1080];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Sd480 => (640, 480),
            Resolution::Hd720 => (1280, 720),
            Resolution::Hd1080 => (1920, 1080),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Sd480 => "480p",
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SettingsError::UnknownResolution(s.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("target fps must be between 1 and {MAX_TARGET_FPS}, got {0}")]
    TargetFps(u32),
    #[error("quality must be in (0, 1], got {0}")]
    Quality(f32),
    #[error("unknown resolution {0:?} (expected 480p, 720p or 1080p)")]
    UnknownResolution(String),
}

/// What the user picks: rate, size and encoder quality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub target_fps: u32,
    pub resolution: Resolution,
    /// Encoder quality in `(0, 1]`.
    pub quality: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            resolution: Resolution::Hd720,
            quality: 0.8,
        }
    }
}

impl CaptureSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.target_fps == 0 || self.target_fps > MAX_TARGET_FPS {
            return Err(SettingsError::TargetFps(self.target_fps));
        }
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(SettingsError::Quality(self.quality));
        }
        Ok(())
    }

    /// Nominal tick period, `1000 / target_fps` ms.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub settings: CaptureSettings,
    pub pacing: Pacing,
    pub sensor_rate_hz: f32,
    /// Used for the intrinsics estimate attached to every frame.
    pub horizontal_fov_deg: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settings: CaptureSettings::default(),
            pacing: Pacing::default(),
            sensor_rate_hz: DEFAULT_SENSOR_RATE_HZ,
            horizontal_fov_deg: DEFAULT_HORIZONTAL_FOV_DEG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_map_to_dimensions() {
        assert_eq!(Resolution::Sd480.dimensions(), (640, 480));
        assert_eq!(Resolution::Hd720.dimensions(), (1280, 720));
        assert_eq!(Resolution::Hd1080.dimensions(), (1920, 1080));
        assert_eq!("1080P".parse::<Resolution>(), Ok(Resolution::Hd1080));
        assert!("4k".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(CaptureSettings::default().validate().is_ok());

        let zero_fps = CaptureSettings {
            target_fps: 0,
            ..Default::default()
        };
        assert_eq!(zero_fps.validate(), Err(SettingsError::TargetFps(0)));

        let bad_quality = CaptureSettings {
            quality: 1.5,
            ..Default::default()
        };
        assert!(bad_quality.validate().is_err());
    }

    #[test]
    fn test_frame_interval_follows_target_fps() {
        let settings = CaptureSettings {
            target_fps: 10,
            ..Default::default()
        };
        assert_eq!(settings.frame_interval(), Duration::from_millis(100));

        let settings = CaptureSettings {
            target_fps: 30,
            ..Default::default()
        };
        assert_eq!(settings.frame_interval().as_millis(), 33);
    }
}
