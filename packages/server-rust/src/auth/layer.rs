//! Authorization middleware for operations.
//!
//! Requirements are attached when the router is built: a [`RouteGroup`]
//! carries the group-level declarations and produces one [`AuthorizeLayer`]
//! per operation with that operation's own declarations. The layer resolves
//! the merged requirements against the ambient context on every call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ambit_core::{Authorizer, OperationRequirements, Requirements};
use axum::http::header::AUTHORIZATION;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use super::error::AuthRejection;

// ---------------------------------------------------------------------------
// RouteGroup
// ---------------------------------------------------------------------------

/// Group-level requirements shared by a set of operations.
#[derive(Debug, Clone)]
pub struct RouteGroup {
    authorizer: Arc<Authorizer>,
    requirements: Requirements,
}

impl RouteGroup {
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>, requirements: Requirements) -> Self {
        Self {
            authorizer,
            requirements,
        }
    }

    /// Layer for an operation that declares nothing of its own.
    #[must_use]
    pub fn layer(&self) -> AuthorizeLayer {
        self.operation(Requirements::default())
    }

    /// Layer for an operation with its own declarations.
    #[must_use]
    pub fn operation(&self, requirements: Requirements) -> AuthorizeLayer {
        AuthorizeLayer::new(
            Arc::clone(&self.authorizer),
            OperationRequirements::new(self.requirements.clone(), requirements),
        )
    }
}

// ---------------------------------------------------------------------------
// AuthorizeLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing one operation's requirements.
#[derive(Debug, Clone)]
pub struct AuthorizeLayer {
    authorizer: Arc<Authorizer>,
    requirements: Arc<OperationRequirements>,
}

impl AuthorizeLayer {
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>, requirements: OperationRequirements) -> Self {
        Self {
            authorizer,
            requirements: Arc::new(requirements),
        }
    }

    #[must_use]
    pub fn requirements(&self) -> &OperationRequirements {
        &self.requirements
    }
}

impl<S> Layer<S> for AuthorizeLayer {
    type Service = AuthorizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizeService {
            inner,
            authorizer: Arc::clone(&self.authorizer),
            requirements: Arc::clone(&self.requirements),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorizeService
// ---------------------------------------------------------------------------

/// Service wrapper that denies the request before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthorizeService<S> {
    inner: S,
    authorizer: Arc<Authorizer>,
    requirements: Arc<OperationRequirements>,
}

impl<S, B> Service<Request<B>> for AuthorizeService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authorizer = Arc::clone(&self.authorizer);
        let requirements = Arc::clone(&self.requirements);

        Box::pin(async move {
            let authorization = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            match authorizer
                .authorize(&requirements, authorization.as_deref())
                .await
            {
                Ok(_) => inner.call(req).await,
                Err(err) => Ok(AuthRejection(err).into_response()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
