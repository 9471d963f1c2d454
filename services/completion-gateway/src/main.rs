//! Completion Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads upstream API keys into a shared credential pool
//! 2. Listens for completion requests
//! 3. Dispatches each one across the configured models, rotating credentials
//!    on account-wide rate limits and repeated errors
//! 4. Serves pool health, Prometheus metrics and a separate admin API

mod admin;
mod api;
mod config;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use credential_pool::{CredentialPool, spawn_gauge_task};
use dispatcher::Dispatcher;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use crate::admin::{AdminState, build_admin_router};
use crate::api::CompletionBody;
use crate::config::Config;

/// Time allowed for in-flight dispatches to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/completions", post(completions_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting completion-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let models = config
        .model_candidates()
        .context("invalid model configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = ?config.server.admin_addr,
        upstream_url = %config.upstream.url,
        models = models.len(),
        credentials = config.credentials.keys.len(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let keys = std::mem::take(&mut config.credentials.keys);
    if keys.is_empty() {
        warn!("no upstream API keys configured, every dispatch will fail until keys are provided");
    }
    let pool = Arc::new(CredentialPool::new(keys, config.pool_policy()));

    let transport = Arc::new(HttpTransport::new(
        reqwest::Client::new(),
        config.upstream.url.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
        &config.headers,
    ));

    let dispatcher = Dispatcher::new(pool.clone(), transport, models, config.dispatch_policy())
        .context("invalid dispatch policy")?
        .with_classifier(Arc::new(config.classifier()));

    let gauges = spawn_gauge_task(
        pool.clone(),
        Duration::from_secs(config.policy.gauge_interval_secs),
    );

    let app_state = AppState {
        dispatcher: Arc::new(dispatcher),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    // Both listeners drain on the same signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let admin_handle = match config.server.admin_addr {
        Some(addr) => {
            let admin_listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {addr}"))?;
            let admin_app = build_admin_router(AdminState::new(pool.clone()));
            let mut rx = shutdown_rx.clone();
            info!(addr = %addr, "admin API listening");
            Some(tokio::spawn(async move {
                axum::serve(admin_listener, admin_app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.changed().await;
                    })
                    .await
            }))
        }
        None => {
            info!("admin API disabled (no server.admin_addr)");
            None
        }
    };

    info!(addr = %config.server.listen_addr, "accepting requests");

    let mut rx = shutdown_rx;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            })
            .await
    });

    // Wait for the OS signal
    shutdown_signal().await;

    // Signal the servers to begin draining
    let _ = shutdown_tx.send(true);

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    if let Some(handle) = admin_handle {
        handle.abort();
    }
    gauges.abort();

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: pool-derived status, uptime and credential counts.
/// Returns 200 while any credential is usable, 503 when none is.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let snapshot = state.dispatcher.pool().status_snapshot().await;

    let status_code = if snapshot.usable > 0 {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": snapshot.health_label(),
        "credentials": {
            "total": snapshot.total,
            "active": snapshot.active,
            "rate_limited": snapshot.rate_limited,
            "error": snapshot.error,
            "usable": snapshot.usable,
        },
        "primary_model": state.dispatcher.models().primary().id,
        "models": state.dispatcher.models().len(),
        "uptime_seconds": uptime,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// POST /v1/completions: one dispatch per request.
async fn completions_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<CompletionBody>, JsonRejection>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    api::complete(&state.dispatcher, body, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
