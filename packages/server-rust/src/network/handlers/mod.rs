//! HTTP handlers owned by the network module.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;

/// State for the built-in health routes.
#[derive(Clone)]
pub struct AppState {
    /// Health state and live-context count.
    pub shutdown: Arc<ShutdownController>,
    /// Server start time, used for uptime.
    pub start_time: Instant,
}
