//! Ambit server: per-request ambient context and declarative authorization
//! for axum/tower services.

pub mod auth;
pub mod lifecycle;
pub mod logging;
pub mod network;

pub use auth::{AuthRejection, AuthorizeLayer, CurrentContext, CurrentPrincipal, RouteGroup};
pub use lifecycle::{LifecycleConfig, RequestContextLayer};
pub use network::{NetworkConfig, NetworkModule};
