//! Request lifecycle middleware.
//!
//! [`RequestContextLayer`] wraps every inbound HTTP request in its own
//! ambient [`RequestContext`] scope:
//!
//! 1. Generates a trace id and builds the [`ContextRecord`] from the request,
//!    optionally attaching an eagerly extracted principal.
//! 2. Runs the inner service inside `store::scope`, so handlers and
//!    everything they await can read the context without it being passed.
//! 3. Cancels the context exactly once when the client disconnects: either
//!    the transport fires a [`DisconnectSignal`] or the response future is
//!    dropped before completion (hyper drops it when the connection closes).
//! 4. Fires `on_context_created` and `on_context_destroyed` exactly once each,
//!    guarded by one-shot flags rather than by listener removal order.
//! 5. Stamps `x-trace-id` and `x-response-time` on the response.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use ambit_core::{store, ContextRecord, RequestContext};
use axum::extract::ConnectInfo;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::{Request, Response};
use tower::{Layer, Service};
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::{LifecycleConfig, RequestInfo};
use super::disconnect::DisconnectSignal;
use super::live::{LiveContexts, LiveGuard};
use super::trace_id::default_trace_id;

/// Response header carrying the request's trace id.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");
/// Response header carrying the handling duration as `<n>ms`.
pub const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time");

const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

// ---------------------------------------------------------------------------
// RequestContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that runs each request inside a fresh request context.
#[derive(Debug, Clone)]
pub struct RequestContextLayer {
    config: Arc<LifecycleConfig>,
    live: Arc<LiveContexts>,
}

impl RequestContextLayer {
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config: Arc::new(config),
            live: Arc::new(LiveContexts::new()),
        }
    }

    /// Shares an existing live-context counter (e.g. with the health handler).
    #[must_use]
    pub fn with_live_contexts(mut self, live: Arc<LiveContexts>) -> Self {
        self.live = live;
        self
    }

    #[must_use]
    pub fn live_contexts(&self) -> Arc<LiveContexts> {
        Arc::clone(&self.live)
    }
}

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContextService {
            inner,
            config: Arc::clone(&self.config),
            live: Arc::clone(&self.live),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestContextService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`RequestContextLayer`].
#[derive(Debug, Clone)]
pub struct RequestContextService<S> {
    inner: S,
    config: Arc<LifecycleConfig>,
    live: Arc<LiveContexts>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestContextService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The ready service is the one that must handle this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = Arc::clone(&self.config);
        let live = self.live.guard();

        let info = RequestInfo {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        };
        let record = build_record(&config, &req, &info);
        let disconnect = if config.enable_cancellation {
            req.extensions().get::<DisconnectSignal>().cloned()
        } else {
            None
        };

        let span = info_span!(
            "request",
            trace_id = %record.trace_id,
            method = %info.method,
            uri = %info.uri,
        );
        let ctx = RequestContext::new(record);

        Box::pin(
            store::scope(ctx.clone(), async move {
                let lifecycle = Lifecycle::new(ctx, config, info, live);
                lifecycle.created();
                let result = lifecycle.drive(inner.call(req), disconnect).await;
                lifecycle.finish(result)
            })
            .instrument(span),
        )
    }
}

/// Builds the initial record for an inbound request.
fn build_record<B>(config: &LifecycleConfig, req: &Request<B>, info: &RequestInfo) -> ContextRecord {
    let mut trace_id = (config.generate_trace_id)();
    if trace_id.is_empty() {
        warn!("trace id generator returned an empty id, using default generator");
        trace_id = default_trace_id();
    }

    let mut record = ContextRecord::new(trace_id)
        .with_method(info.method.as_str())
        .with_url(info.uri.to_string());

    if let Some(request_id) = info.header(REQUEST_ID_HEADER).filter(|v| !v.is_empty()) {
        record = record.with_request_id(request_id);
    }
    if let Some(addr) = client_address(req, info) {
        record = record.with_client_address(addr);
    }
    if let Some(user_agent) = info.header(USER_AGENT.as_str()) {
        record = record.with_user_agent(user_agent);
    }
    if let Some(principal) = config.extract_user.as_ref().and_then(|extract| extract(info)) {
        record.set_principal(Arc::new(principal));
    }
    record
}

/// Peer address from `ConnectInfo`, else the first `x-forwarded-for` hop.
fn client_address<B>(req: &Request<B>, info: &RequestInfo) -> Option<String> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }
    info.header(FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Flag that can be claimed exactly once.
#[derive(Debug, Default)]
struct OnceFlag(AtomicBool);

impl OnceFlag {
    /// Returns true for the first caller only.
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Per-request lifecycle state; owned by the request's future.
///
/// Dropping it before [`Lifecycle::finish`] means the response future was
/// abandoned, which is treated as a client abort.
struct Lifecycle {
    ctx: RequestContext,
    config: Arc<LifecycleConfig>,
    info: RequestInfo,
    created: OnceFlag,
    cancelled: OnceFlag,
    destroyed: OnceFlag,
    completed: AtomicBool,
    _live: LiveGuard,
}

impl Lifecycle {
    fn new(
        ctx: RequestContext,
        config: Arc<LifecycleConfig>,
        info: RequestInfo,
        live: LiveGuard,
    ) -> Self {
        Self {
            ctx,
            config,
            info,
            created: OnceFlag::default(),
            cancelled: OnceFlag::default(),
            destroyed: OnceFlag::default(),
            completed: AtomicBool::new(false),
            _live: live,
        }
    }

    fn created(&self) {
        if !self.created.claim() {
            return;
        }
        debug!(user_agent = self.info.header(USER_AGENT.as_str()), "request started");
        if let Some(callback) = &self.config.on_context_created {
            callback(&self.ctx.snapshot(), &self.info);
        }
    }

    /// Awaits the inner future, cancelling the context if the transport
    /// reports a disconnect first. The subscription ends with this call.
    async fn drive<F: Future>(&self, fut: F, disconnect: Option<DisconnectSignal>) -> F::Output {
        let Some(signal) = disconnect else {
            return fut.await;
        };
        tokio::pin!(fut);
        tokio::select! {
            biased;
            out = &mut fut => return out,
            () = signal.fired() => self.cancel("client disconnected"),
        }
        // Cancellation is cooperative: the handler still runs to completion.
        fut.await
    }

    fn cancel(&self, reason: &'static str) {
        if !self.cancelled.claim() {
            return;
        }
        self.ctx.cancel();
        metrics::counter!("ambit_requests_cancelled_total").increment(1);
        info!(reason, "request context cancelled");
    }

    fn finish<B, E: Display>(&self, mut result: Result<Response<B>, E>) -> Result<Response<B>, E> {
        self.completed.store(true, Ordering::Release);
        let elapsed = self.ctx.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = elapsed.as_millis() as u64;

        match &mut result {
            Ok(response) => {
                stamp_headers(response, &self.ctx.trace_id(), duration_ms);
                let status = response.status();
                metrics::counter!("ambit_requests_total", "status" => status.as_str().to_owned())
                    .increment(1);
                metrics::histogram!("ambit_request_duration_seconds")
                    .record(elapsed.as_secs_f64());
                if status.is_server_error() {
                    warn!(status = status.as_u16(), duration_ms, "request completed with server error");
                } else {
                    info!(
                        status = status.as_u16(),
                        duration_ms,
                        user_id = self.ctx.user_id().as_deref(),
                        cancelled = self.ctx.is_cancelled(),
                        "request completed"
                    );
                }
            }
            Err(err) => {
                metrics::counter!("ambit_requests_total", "status" => "error").increment(1);
                warn!(error = %err, duration_ms, "request failed");
            }
        }

        self.destroy();
        result
    }

    fn destroy(&self) {
        if !self.destroyed.claim() {
            return;
        }
        if let Some(callback) = &self.config.on_context_destroyed {
            callback(&self.ctx.snapshot(), &self.info);
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if !self.completed.load(Ordering::Acquire) {
            if self.config.enable_cancellation {
                self.cancel("response future dropped before completion");
            }
            debug!("request abandoned before completion");
        }
        self.destroy();
    }
}

fn stamp_headers<B>(response: &mut Response<B>, trace_id: &str, duration_ms: u64) {
    let headers = response.headers_mut();
    match HeaderValue::from_str(trace_id) {
        Ok(value) => {
            headers.insert(TRACE_ID_HEADER, value);
        }
        Err(_) => warn!(trace_id, "trace id is not a valid header value"),
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{duration_ms}ms")) {
        headers.insert(RESPONSE_TIME_HEADER, value);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
