//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates shared state,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Between `start()` and `serve()` the caller can hand the
//! live-context counter or shutdown controller to other components.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::lifecycle::{LifecycleConfig, LiveContexts, RequestContextLayer};

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the live-context counter and shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown, then drains
pub struct NetworkModule {
    config: NetworkConfig,
    lifecycle: LifecycleConfig,
    listener: Option<TcpListener>,
    live: Arc<LiveContexts>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, lifecycle: LifecycleConfig) -> Self {
        let live = Arc::new(LiveContexts::new());
        Self {
            config,
            lifecycle,
            listener: None,
            shutdown: Arc::new(ShutdownController::new(Arc::clone(&live))),
            live,
        }
    }

    /// Counter of request contexts currently alive.
    #[must_use]
    pub fn live_contexts(&self) -> Arc<LiveContexts> {
        Arc::clone(&self.live)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Merges `app` with the health routes and applies the middleware stack.
    ///
    /// Routes added here:
    /// - `GET /health` -- health JSON with live-context count
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    pub fn build_router(&self, app: Router) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            start_time: Instant::now(),
        };

        let context = RequestContextLayer::new(self.lifecycle.clone())
            .with_live_contexts(Arc::clone(&self.live));
        let layers = build_http_layers(&self.config, context);

        let health = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state);

        app.merge(health).layer(layers)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves `app` until `shutdown` resolves, then drains live contexts.
    ///
    /// After the shutdown signal:
    /// 1. Health state transitions to Draining
    /// 2. Waits up to `drain_timeout` for live request contexts to finish
    /// 3. Health state transitions to Stopped
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        app: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let router = self.build_router(app);
        let controller = Arc::clone(&self.shutdown);
        let drain_timeout = self.config.drain_timeout;

        controller.set_ready();
        info!("Serving HTTP connections");

        let signal_controller = Arc::clone(&controller);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_controller.trigger_shutdown();
        })
        .await?;

        // Also covers the listener failing without a shutdown signal.
        controller.trigger_shutdown();
        let live = controller.live_count();
        if live > 0 {
            info!("Draining {} live request contexts", live);
        }
        if controller.wait_for_drain(drain_timeout).await {
            info!("All request contexts drained");
        } else {
            warn!(
                remaining = controller.live_count(),
                "Drain timeout expired with live request contexts remaining"
            );
        }
        Ok(())
    }
}
