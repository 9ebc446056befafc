//! Authentication providers and authorization middleware.
//!
//! - [`layer`]: Per-operation authorization layer and route groups
//! - [`error`]: HTTP rendering of denials
//! - [`extract`]: axum extractors for the current context and principal
//! - [`jwt`]: HS256 JWT provider
//! - [`static_provider`]: Fixed token table provider

pub mod error;
pub mod extract;
pub mod jwt;
pub mod layer;
pub mod static_provider;

pub use error::AuthRejection;
pub use extract::{CurrentContext, CurrentPrincipal};
pub use jwt::JwtAuthProvider;
pub use layer::{AuthorizeLayer, AuthorizeService, RouteGroup};
pub use static_provider::StaticAuthProvider;
