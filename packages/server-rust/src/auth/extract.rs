//! axum extractors over the ambient request context.

use std::sync::Arc;

use ambit_core::{store, AuthzError, Principal, RequestContext};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use super::error::AuthRejection;

/// The current request's context.
///
/// Rejects with `500` when the handler is not running under
/// [`crate::lifecycle::RequestContextLayer`].
#[derive(Debug, Clone)]
pub struct CurrentContext(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for CurrentContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        store::current().map(Self).ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "request context unavailable",
        ))
    }
}

/// The principal established for the current request.
///
/// Rejects with `401` when no principal has been attached.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Arc<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentPrincipal {
    type Rejection = AuthRejection;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        store::current()
            .and_then(|ctx| ctx.principal())
            .map(Self)
            .ok_or(AuthRejection(AuthzError::Unauthenticated))
    }
}
