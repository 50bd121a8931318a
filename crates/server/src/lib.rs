mod config;
mod events;
mod server;
mod tracker;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use server::DevServer;
pub use tracker::{SessionTracker, session_name};
