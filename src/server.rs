//! HTTP surface: webhook endpoint, health, and the safety-mode controls.

use crate::config::{ModeSwitch, OperatingMode};
use crate::dispatch::{DeliveryOutcome, Dispatcher};
use crate::forms::FormStore;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};

use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub mode: Arc<ModeSwitch>,
    pub forms: Arc<dyn FormStore>,
    pub mirror_configured: bool,
    pub assistant_configured: bool,
    pub alert_transport: &'static str,
}

// -- Response types --

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
    forwarding: &'static str,
    assistant: &'static str,
    alerts: &'static str,
    completed_users: usize,
    link_sent_users: usize,
}

#[derive(serde::Serialize)]
struct SafetyResponse {
    status: &'static str,
    assistant_replies: &'static str,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health))
        .route("/safety/forwarding-only", post(enable_forwarding_only))
        .route("/safety/full-mode", post(enable_full_mode));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(crate::telemetry::metrics_handler));

    router.with_state(state)
}

/// Start the HTTP server on the given address.
///
/// Returns the `JoinHandle` so the caller can hold it for lifetime
/// management. The server shuts down when `shutdown_rx` signals true.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

// -- Handlers --

/// Main webhook endpoint: receives every platform delivery.
///
/// Only a bad signature maps to a non-200; every other failure mode is
/// absorbed so the platform never retries destructively.
async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("x-line-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json");

    let outcome = state
        .dispatcher
        .handle_delivery(&body, content_type, signature)
        .await;

    match outcome {
        DeliveryOutcome::Rejected => {
            (StatusCode::BAD_REQUEST, "invalid signature").into_response()
        }
        _ => (StatusCode::OK, "OK").into_response(),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let counts = state.forms.counts().await;
    Json(HealthResponse {
        status: "ok",
        mode: state.mode.current().as_str(),
        forwarding: configured(state.mirror_configured),
        assistant: configured(state.assistant_configured),
        alerts: state.alert_transport,
        completed_users: counts.completed,
        link_sent_users: counts.link_sent,
    })
}

/// Emergency control: disable assistant replies, keep CRM forwarding.
async fn enable_forwarding_only(State(state): State<Arc<AppState>>) -> Json<SafetyResponse> {
    state.mode.set(OperatingMode::ForwardingOnly);
    tracing::warn!("forwarding-only mode enabled");
    Json(SafetyResponse {
        status: "forwarding_only_enabled",
        assistant_replies: "disabled",
    })
}

/// Re-enable assistant replies.
async fn enable_full_mode(State(state): State<Arc<AppState>>) -> Json<SafetyResponse> {
    state.mode.set(OperatingMode::Full);
    tracing::info!("full mode enabled");
    Json(SafetyResponse {
        status: "full_mode_enabled",
        assistant_replies: "enabled",
    })
}

fn configured(active: bool) -> &'static str {
    if active { "active" } else { "not configured" }
}
