use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// An ack is sent to a client after every this many frames.
    pub ack_every: u64,
    /// Number of recent frames the average latency is taken over.
    pub latency_window: usize,
    pub max_message_bytes: usize,
    pub report_interval: Duration,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_owned(),
            port: framecast::DEFAULT_PORT,
            ack_every: 10,
            latency_window: 100,
            max_message_bytes: 10 * 1024 * 1024,
            report_interval: Duration::from_secs(5),
        }
    }
}
