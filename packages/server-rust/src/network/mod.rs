//! HTTP server plumbing: configuration, middleware stack, health routes,
//! and graceful shutdown.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use middleware::build_http_layers;
pub use module::NetworkModule;
pub use shutdown::{HealthState, ShutdownController};
