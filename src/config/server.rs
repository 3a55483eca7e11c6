//! Server configuration

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests handled concurrently before new ones queue
    pub max_concurrent_requests: usize,
    /// Largest accepted request body
    pub body_limit_bytes: usize,
    /// Seconds to wait for in-flight requests on shutdown
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_concurrent_requests: 1000,
            body_limit_bytes: 10 * 1024 * 1024,
            shutdown_grace_seconds: 10,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
