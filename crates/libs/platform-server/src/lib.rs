//! HTTP surface: git-smart-http transport, workspace reverse proxy, and
//! the repository/action/workspace JSON API, plus the ambient concerns
//! every route sits behind — auth, rate limiting, tracing, metrics.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod auth;
pub mod error;
pub mod git_transport;
pub mod proxy;
pub mod ratelimit;

pub use error::ServerError;
use platform_common::AppConfig;
pub use platform_core::ModelManager;
use platform_runtime::{CliContainerRuntime, WorkspaceSupervisor};

use auth::session_auth_middleware;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub mm: ModelManager,
    pub supervisor: Arc<WorkspaceSupervisor<CliContainerRuntime>>,
    pub event_bus: platform_core::event_bus::EventBus,
    pub auth_secret: Option<String>,
    pub ratelimit_config: ratelimit::RateLimitConfig,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[allow(clippy::expect_used)]
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            const EXPONENTIAL_SECONDS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

            PrometheusBuilder::new()
                .set_buckets_for_metric(Matcher::Full("http_request_duration_seconds".to_string()), EXPONENTIAL_SECONDS)
                .expect("failed to set metrics buckets")
                .install_recorder()
                .expect("failed to install prometheus recorder")
        })
        .clone()
}

/// Build the `AppState`, wire up the background workers it depends on
/// (the event bus and the action orchestrator), and serve until a
/// shutdown signal arrives. Callers needing finer control over process
/// lifetime (tests, the `platform-server-bin` binary) can instead use
/// [`build_router`] directly against their own `ModelManager`.
pub async fn run(config: Arc<AppConfig>) -> std::result::Result<(), ServerError> {
    let metrics_handle = setup_metrics();
    let mm = ModelManager::new(config.clone()).await?;

    let event_bus = platform_core::event_bus::EventBus::new(mm.clone(), 5);
    event_bus.run(config.runtime.event_worker_count);

    let container_runtime = Arc::new(CliContainerRuntime::new(config.runtime.container_runtime_bin.clone()));
    let sandbox_runner = Arc::new(platform_runtime::SandboxRunner::new(
        container_runtime.clone(),
        config.runtime.sandbox_output_cap_bytes as usize,
    ));
    let orchestrator = Arc::new(platform_runtime::ActionOrchestrator::new(mm.clone(), sandbox_runner));
    orchestrator.run(config.runtime.event_worker_count);

    let ports = Arc::new(platform_runtime::PortAllocator::new(
        config.runtime.workspace_port_range_start,
        config.runtime.workspace_port_range_end,
    ));
    let workspaces_root = platform_core::store::workspaces_root(&config.server.data_dir);
    let supervisor = Arc::new(WorkspaceSupervisor::new(mm.clone(), container_runtime, ports, workspaces_root));

    // Workspaces left `running` from a prior process lifetime still hold a
    // container and a port; re-reserve those ports before serving so a new
    // workspace can't be handed one that's actually in use.
    let root_ctx = platform_core::Ctx::root_ctx();
    for user in platform_core::model::user::UserBmc::list_all(&root_ctx, &mm).await? {
        supervisor.reconcile_on_startup(user.id).await?;
    }

    let app_state = AppState {
        mm,
        supervisor,
        event_bus,
        auth_secret: config.server.auth_secret.clone(),
        ratelimit_config: ratelimit::RateLimitConfig::new(50, 100, !cfg!(test)),
        metrics_handle,
        start_time: Instant::now(),
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, "platform-server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Assemble the full router over an already-constructed [`AppState`].
/// Split out from [`run`] so integration tests can stand up the app
/// against a test `ModelManager` without binding a socket.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(api::routes())
        .merge(git_transport::routes())
        .merge(proxy::routes())
        .route_layer(axum::middleware::from_fn_with_state(app_state.clone(), session_auth_middleware))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .route_layer(axum::middleware::from_fn_with_state(app_state.clone(), ratelimit::rate_limit_middleware))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static("default-src 'self'; connect-src 'self'; style-src 'self' 'unsafe-inline'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY")))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(app_state)
}

#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse { status: "healthy", uptime_seconds: state.start_time.elapsed().as_secs() };
    (StatusCode::OK, axum::Json(response))
}

#[derive(serde::Serialize)]
struct ReadyResponse {
    status: &'static str,
    database: &'static str,
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = matches!(state.mm.health_check().await, Ok(true));
    let response = ReadyResponse {
        status: if db_ok { "ready" } else { "not_ready" },
        database: if db_ok { "connected" } else { "disconnected" },
    };
    let status_code = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, axum::Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
