//! JWT bearer-token authentication provider.
//!
//! Validates HS256 tokens and maps their payload onto a [`Principal`]:
//!
//! ```json
//! {
//!   "sub": "u-1",
//!   "username": "ada",
//!   "email": "ada@example.com",
//!   "roles": ["Admin"],
//!   "claims": { "permission": ["read:docs", "write:docs"], "dept": "eng" },
//!   "exp": 1767225600
//! }
//! ```

use std::collections::BTreeMap;

use ambit_core::{AuthProvider, Principal, ProviderError};
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Token payload accepted by [`JwtAuthProvider`].
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    claims: BTreeMap<String, ClaimValues>,
}

/// A claim type carries one value or several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaimValues {
    One(String),
    Many(Vec<String>),
}

impl TokenClaims {
    fn into_principal(self) -> Result<Principal, ProviderError> {
        let id = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::InvalidPrincipal("missing sub".into()))?;

        let mut principal = Principal::new(id)
            .with_username(self.username)
            .with_email(self.email);
        for role in self.roles {
            principal = principal.with_role(role);
        }
        for (kind, values) in self.claims {
            match values {
                ClaimValues::One(value) => principal = principal.with_claim(kind, value),
                ClaimValues::Many(values) => {
                    for value in values {
                        principal = principal.with_claim(kind.clone(), value);
                    }
                }
            }
        }
        Ok(principal)
    }
}

/// Validates HS256-signed JWTs with a shared secret.
pub struct JwtAuthProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthProvider {
    /// Provider for tokens signed with `secret`. `exp` is required.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Requires the `iss` claim to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Clock skew tolerated when checking `exp`, in seconds.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }
}

impl std::fmt::Debug for JwtAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthProvider")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn validate_token(&self, token: &str) -> Result<Principal, ProviderError> {
        let data = decode::<TokenClaims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => ProviderError::Expired,
                _ => ProviderError::InvalidToken(err.to_string()),
            }
        })?;
        data.claims.into_principal()
    }
}
