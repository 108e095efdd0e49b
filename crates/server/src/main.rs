use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use coordinator::{Coordinator, CoordinatorOptions, MonotonicClock};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod ws;

use app_state::AppState;
use config::load_settings;

#[derive(Debug, Parser)]
#[command(name = "mission-server", about = "Authoritative mission coordination server")]
struct Args {
    /// TOML settings file; `server.toml` in the working directory when omitted.
    #[arg(long, env = "MISSION_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = settings
        .registry()
        .context("invalid mission table in configuration")?;
    let coordinator = Coordinator::spawn(
        &registry,
        Arc::new(MonotonicClock::new()),
        CoordinatorOptions {
            broadcast_capacity: settings.broadcast_capacity,
        },
    );

    let state = AppState {
        coordinator: Arc::clone(&coordinator),
        max_request_bytes: settings.max_request_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, missions = registry.len(), "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c; shutting down");
    }
    info!("shutdown requested");
}

fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_request_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/snapshot", get(http_snapshot))
        .route("/commands", post(http_command))
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_snapshot(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.coordinator.snapshot().await)
}

async fn http_command(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<ServerEvent>) {
    let request: ClientRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ServerEvent::Error(ApiError::new(
                    ErrorCode::Validation,
                    format!("malformed request: {error}"),
                ))),
            )
        }
    };

    match state.coordinator.handle(&request).await {
        Ok(snapshot) => (StatusCode::OK, Json(ServerEvent::Snapshot { snapshot })),
        Err(rejection) => {
            let status = match rejection.error.code() {
                ErrorCode::UnknownMission => StatusCode::NOT_FOUND,
                ErrorCode::InvalidTransition => StatusCode::CONFLICT,
                ErrorCode::Validation => StatusCode::BAD_REQUEST,
                ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(rejection.to_event()))
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
