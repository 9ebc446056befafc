//! Fixed token-to-principal authentication provider.

use std::collections::HashMap;

use ambit_core::{AuthProvider, Principal, ProviderError};
use async_trait::async_trait;

/// Accepts a fixed set of opaque tokens.
///
/// Useful for development servers and tests. Unknown tokens are rejected
/// with [`ProviderError::InvalidToken`].
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    tokens: HashMap<String, Principal>,
}

impl StaticAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn validate_token(&self, token: &str) -> Result<Principal, ProviderError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidToken("unknown token".into()))
    }
}
