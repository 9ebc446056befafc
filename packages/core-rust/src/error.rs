//! Error taxonomy for authorization and authentication.

use std::fmt;

/// Why an authenticated principal was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// The principal holds none of the required roles.
    MissingRole { required: Vec<String> },
    /// The principal lacks a required claim.
    MissingClaim { kind: String, value: Option<String> },
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRole { required } => {
                write!(f, "requires one of roles: {}", required.join(", "))
            }
            Self::MissingClaim {
                kind,
                value: Some(value),
            } => write!(f, "requires claim {kind}={value}"),
            Self::MissingClaim { kind, value: None } => write!(f, "requires claim {kind}"),
        }
    }
}

/// Terminal authorization decision returned to the caller on denial.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// An effective requirement exists but no principal is present.
    #[error("authentication required")]
    Unauthenticated,
    /// A principal is present but fails a role or claim check.
    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),
}

/// Failure reported by an authentication provider.
///
/// The resolver downgrades every variant to "no principal"; these never
/// reach the caller of `Authorizer::authorize`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider returned an invalid principal: {0}")]
    InvalidPrincipal(String),
}

/// Invalid requirement declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    #[error("role requirement must name at least one role")]
    EmptyRoleSet,
    #[error("claim requirement must have a non-empty type")]
    EmptyClaimType,
}
