//! Demo HTTP server showing ambient request contexts and declarative
//! authorization.
//!
//! ```text
//! GET    /public             no requirements
//! GET    /me                 roles User | Admin
//! GET    /admin/stats        group roles Admin
//! DELETE /admin/users/{id}   group roles Admin + claim permission=delete:users
//! GET    /slow               cooperative cancellation on client disconnect
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ambit_core::{store, Authorizer, ClaimRequirement, Requirements};
use ambit_server::auth::{CurrentContext, CurrentPrincipal, JwtAuthProvider, RouteGroup};
use ambit_server::lifecycle::LifecycleConfig;
use ambit_server::logging::{self, LogFormat};
use ambit_server::network::{NetworkConfig, NetworkModule};
use axum::extract::Path;
use axum::routing::{delete, get};
use axum::{Json, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "demo-server", version, about = "Ambit demo HTTP server")]
struct Args {
    /// Bind address.
    #[arg(long, env = "AMBIT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Listen port (0 = OS-assigned).
    #[arg(long, env = "AMBIT_PORT", default_value_t = 8080)]
    port: u16,

    /// HS256 secret used to validate bearer tokens.
    #[arg(long, env = "AMBIT_JWT_SECRET", default_value = "dev-secret")]
    jwt_secret: String,

    /// Do not cancel request contexts when clients disconnect.
    #[arg(long)]
    no_cancellation: bool,

    /// Log output format: text or json.
    #[arg(long, env = "AMBIT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Filter directive used when RUST_LOG is unset.
    #[arg(long, default_value = "info,ambit_server=debug")]
    log_filter: String,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "AMBIT_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_format, &args.log_filter)?;

    if let Some(port) = args.metrics_port {
        let addr: SocketAddr = format!("{}:{port}", args.host).parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Prometheus exporter listening");
    }

    let authorizer = Arc::new(Authorizer::with_provider(Arc::new(JwtAuthProvider::hs256(
        args.jwt_secret.as_bytes(),
    ))));
    let app = routes(&authorizer)?;

    let lifecycle = LifecycleConfig::default()
        .with_cancellation(!args.no_cancellation)
        .on_created(|record, _| debug!(trace_id = %record.trace_id, "context created"))
        .on_destroyed(|record, _| {
            debug!(
                trace_id = %record.trace_id,
                user_id = record.user_id.as_deref(),
                elapsed_ms = u64::try_from(record.elapsed().as_millis()).unwrap_or(u64::MAX),
                "context destroyed"
            );
        });

    let mut module = NetworkModule::new(
        NetworkConfig {
            host: args.host,
            port: args.port,
            ..NetworkConfig::default()
        },
        lifecycle,
    );
    let port = module.start().await?;
    info!(port, "demo server ready");

    module.serve(app, shutdown_signal()).await
}

fn routes(authorizer: &Arc<Authorizer>) -> anyhow::Result<Router> {
    let root = RouteGroup::new(Arc::clone(authorizer), Requirements::new());
    let admin = RouteGroup::new(Arc::clone(authorizer), Requirements::new().roles(["Admin"])?);

    let admin_routes = Router::new()
        .route("/stats", get(admin_stats).layer(admin.layer()))
        .route(
            "/users/{id}",
            delete(delete_user).layer(admin.operation(
                Requirements::new().claim(ClaimRequirement::new("permission", "delete:users"))?,
            )),
        );

    Ok(Router::new()
        .route("/public", get(public).layer(root.layer()))
        .route(
            "/me",
            get(me).layer(root.operation(Requirements::new().roles(["User", "Admin"])?)),
        )
        .route("/slow", get(slow).layer(root.layer()))
        .nest("/admin", admin_routes))
}

async fn public(CurrentContext(ctx): CurrentContext) -> Json<Value> {
    Json(json!({
        "message": "hello",
        "trace_id": ctx.trace_id(),
        "user_id": ctx.user_id(),
    }))
}

async fn me(CurrentPrincipal(principal): CurrentPrincipal) -> Json<Value> {
    Json(json!({
        "id": principal.id,
        "username": principal.username,
        "email": principal.email,
        "roles": principal.role_list(),
        "claims": principal.claims,
    }))
}

async fn admin_stats(CurrentContext(ctx): CurrentContext) -> Json<Value> {
    Json(json!({
        "trace_id": ctx.trace_id(),
        "elapsed_ms": u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
    }))
}

async fn delete_user(Path(id): Path<String>) -> Json<Value> {
    let by = store::current().and_then(|ctx| ctx.user_id());
    info!(user = %id, by = by.as_deref(), "user deleted");
    Json(json!({ "deleted": id }))
}

/// Works in steps and stops early once the context is cancelled.
///
/// A disconnect drops this handler, so the work runs on a context-carrying
/// task that outlives it and sees the cancellation.
async fn slow() -> Json<Value> {
    let worker = store::spawn(async {
        let mut completed = 0_u32;
        for _ in 0..10 {
            if store::is_cancelled() {
                info!(completed, "slow work abandoned");
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            completed += 1;
        }
        completed
    });
    Json(json!({ "steps": worker.await.unwrap_or_default() }))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
