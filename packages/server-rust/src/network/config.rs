//! Network configuration.

use std::time::Duration;

/// Listener, CORS, and timing settings for [`super::NetworkModule`].
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Handler deadline; past it the handler is dropped and the client gets
    /// a 408 from inside the still-open request context.
    pub request_timeout: Duration,
    /// How long `serve` waits after shutdown for live request contexts to be
    /// destroyed before giving up and returning.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
