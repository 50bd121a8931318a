use std::time::Duration;

use framecast::{CaptureConfig, DEFAULT_HOST, DEFAULT_PORT, TransportConfig};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub capture: CaptureConfig,
    pub transport: TransportConfig,
    /// Simulated shutter-to-bytes delay of the synthetic camera.
    pub camera_latency: Duration,
    /// Stop after this long; `None` streams until interrupted.
    pub duration: Option<Duration>,
    pub connect_timeout: Duration,
    pub report_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            capture: CaptureConfig::default(),
            transport: TransportConfig::default(),
            camera_latency: Duration::from_millis(30),
            duration: None,
            connect_timeout: Duration::from_secs(10),
            report_interval: Duration::from_secs(1),
        }
    }
}
