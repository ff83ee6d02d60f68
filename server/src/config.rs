//! Runtime settings for the network server.

use shared::{DEFAULT_PORT, MIN_TICK_INTERVAL_MS};
use std::time::Duration;

/// Settings the server loop needs beyond the bind address.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Minimum wall-clock gap between two simulation steps
    pub tick_interval: Duration,
    /// How often the loop checks whether a step is due
    pub poll_interval: Duration,
    pub max_clients: usize,
    /// Silence after which a client is dropped
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_interval: Duration::from_millis(MIN_TICK_INTERVAL_MS),
            poll_interval: Duration::from_millis(10),
            max_clients: 32,
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
