use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use framecast_server::{DevServer, ServerConfig, ServerEvent};

#[derive(Parser)]
#[command(name = "framecast-server")]
#[command(about = "Development server for framecast capture streams")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = framecast::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 10, help = "Acknowledge every N frames")]
    ack_every: u64,

    #[arg(long, default_value_t = 5, help = "Seconds between stats reports")]
    report_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        ack_every: args.ack_every,
        report_interval: Duration::from_secs(args.report_secs.max(1)),
        ..Default::default()
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async move {
        let addr = config.bind_addr();
        let mut server = DevServer::bind(config)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        log::info!("Server started on ws://{}", server.local_addr()?);

        let logger = server.take_events().map(|mut events| {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    log_event(event);
                }
            })
        });

        server
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for ctrl-c: {e}");
                }
            })
            .await;
        if let Some(logger) = logger {
            // flush the final session summary
            let _ = tokio::time::timeout(Duration::from_secs(1), logger).await;
        }
        log::info!("Server stopped");
        Ok::<_, anyhow::Error>(())
    })
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientConnected { client_id, addr } => {
            log::info!("Client {client_id} connected from {addr}");
        }
        ServerEvent::ClientDisconnected {
            client_id,
            reason,
            remaining,
        } => {
            log::info!(
                "Client {client_id} {}. Active clients: {remaining}",
                reason.as_str()
            );
        }
        ServerEvent::SessionStarted { session_id } => {
            log::info!("Created new session: {session_id}");
        }
        ServerEvent::SessionEnded { stats } => {
            log::info!(
                "Session ended: {} | {} frames in {:.1}s | {:.1} fps | {:.1} ms latency",
                stats.session_id.as_deref().unwrap_or("-"),
                stats.frame_count,
                stats.duration_secs,
                stats.fps,
                stats.avg_latency_ms
            );
        }
        ServerEvent::Error { message } => {
            log::warn!("{message}");
        }
    }
}
