mod app;
mod config;
mod sim;

use std::time::{Duration, TryFromFloatSecsError};

use anyhow::{Context, Result};
use clap::Parser;

use framecast::{CaptureConfig, CaptureSettings, Pacing, Resolution, TransportConfig};

use app::App;
use config::ClientConfig;

#[derive(Parser)]
#[command(name = "framecast-client")]
#[command(about = "Streams synthetic camera frames and inertial data to a framecast server")]
struct Args {
    #[arg(long, default_value = framecast::DEFAULT_HOST)]
    host: String,

    #[arg(short, long, default_value_t = framecast::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 10, help = "Target frames per second (1-60)")]
    fps: u32,

    #[arg(short, long, default_value_t = Resolution::Hd720, help = "480p, 720p or 1080p")]
    resolution: Resolution,

    #[arg(short, long, default_value_t = 0.8, help = "JPEG quality in (0, 1]")]
    quality: f32,

    #[arg(short, long, help = "Seconds to stream; runs until ctrl-c when omitted")]
    duration: Option<f64>,

    #[arg(long, default_value_t = 30, help = "Synthetic camera latency in ms")]
    camera_latency: u64,

    #[arg(long, default_value_t = 100.0, help = "Sensor sampling rate in Hz")]
    sensor_rate: f32,

    #[arg(long, help = "Capture on a fixed timer instead of self-correcting delays")]
    fixed_interval: bool,

    #[arg(long, default_value_t = 1000, help = "First reconnect delay in ms")]
    reconnect_delay: u64,

    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    #[arg(long, help = "Seconds between keepalive pings")]
    ping: Option<f64>,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let settings = CaptureSettings {
            target_fps: self.fps,
            resolution: self.resolution,
            quality: self.quality,
        };
        settings.validate().context("invalid capture settings")?;

        let pacing = if self.fixed_interval {
            Pacing::FixedInterval
        } else {
            Pacing::default()
        };

        Ok(ClientConfig {
            host: self.host,
            port: self.port,
            capture: CaptureConfig {
                settings,
                pacing,
                sensor_rate_hz: self.sensor_rate,
                ..Default::default()
            },
            transport: TransportConfig {
                base_delay: Duration::from_millis(self.reconnect_delay),
                max_attempts: self.max_attempts,
                ping_interval: positive_secs(self.ping).context("invalid ping interval")?,
                ..Default::default()
            },
            camera_latency: Duration::from_millis(self.camera_latency),
            duration: positive_secs(self.duration).context("invalid duration")?,
            ..Default::default()
        })
    }
}

/// Non-positive values mean "not set"; values too large for a `Duration`
/// are an error.
fn positive_secs(secs: Option<f64>) -> Result<Option<Duration>, TryFromFloatSecsError> {
    secs.filter(|s| *s > 0.0)
        .map(Duration::try_from_secs_f64)
        .transpose()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Args::parse().into_config()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let app = App::new(config);
        app.run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
        .map(|_| ())
    })
}
