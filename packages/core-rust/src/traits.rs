use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::Principal;

/// Derives a principal from a bearer credential.
///
/// Consulted by [`crate::authz::Authorizer`] only when no principal is
/// attached to the current context yet.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Validates `token` (without the `Bearer ` prefix) and returns the
    /// principal it identifies.
    async fn validate_token(&self, token: &str) -> Result<Principal, ProviderError>;
}
