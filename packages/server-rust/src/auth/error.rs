//! HTTP rendering of authorization denials.

use ambit_core::AuthzError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Wraps an [`AuthzError`] so it can be returned from handlers and layers.
///
/// - `Unauthenticated` → `401` with `WWW-Authenticate: Bearer`
/// - `Forbidden` → `403`, body names the unmet requirement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(transparent)]
pub struct AuthRejection(#[from] pub AuthzError);

impl AuthRejection {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0 {
            AuthzError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthzError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": status.as_u16(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}
