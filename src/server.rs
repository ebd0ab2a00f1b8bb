//! HTTP surface: webhook ingestion, health, and stream state inspection.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::error::RelayError;
use crate::events::model::{DeploymentVersion, StreamKey};
use crate::relay::EventRouter;
use crate::store::StateStore;

/// Header carrying the route hint when posting to `/webhook`.
pub const ROUTE_HEADER: &str = "x-relay-route";
/// Alternative to `Authorization: Bearer`.
pub const TOKEN_HEADER: &str = "x-relay-token";

const SERVICE_NAME: &str = "pin-relay";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub store: Arc<dyn StateStore>,
    pub auth_token: Arc<SecretString>,
    pub version: DeploymentVersion,
}

/// Build the Axum router with the webhook and inspection routes.
pub fn relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook_by_header))
        .route("/webhook/", post(webhook_by_header))
        .route("/webhook/{hint}", post(webhook_by_path))
        .route("/api/streams", get(list_streams))
        .route("/api/streams/{key}", get(get_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": state.version,
        "active_streams": state.router.registry().active_streams(),
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────────

async fn webhook_by_path(
    State(state): State<AppState>,
    Path(hint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    ingest(&state, Some(hint.as_str()), &headers, &body).await
}

async fn webhook_by_header(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let hint = headers
        .get(ROUTE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    ingest(&state, hint.as_deref(), &headers, &body).await
}

async fn ingest(state: &AppState, hint: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Response {
    if let Err(rejection) = authorize(state, headers) {
        return rejection;
    }

    match state.router.dispatch(hint, body).await {
        Ok(processed) => {
            debug!(
                stream_key = %processed.stream_key,
                message_id = %processed.message_id,
                "Webhook handled"
            );
            Json(json!({
                "status": "ok",
                "stream_key": processed.stream_key,
                "message_id": processed.message_id.0,
                "unpin_failed": processed.unpin_failed,
            }))
            .into_response()
        }
        Err(e) => relay_error_response(&e),
    }
}

fn relay_error_response(err: &RelayError) -> Response {
    let status = match err {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::Send(e) | RelayError::Pin(e) if e.is_transient() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RelayError::Send(_) | RelayError::Pin(_) => StatusCode::BAD_GATEWAY,
        RelayError::Persistence(_) | RelayError::ActorUnavailable(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(kind = err.kind(), error = %err, "Webhook failed");
    }
    error_response(status, err.kind(), &err.to_string())
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "kind": kind,
            "message": message,
        })),
    )
        .into_response()
}

// ── Auth ────────────────────────────────────────────────────────────────

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = state.auth_token.expose_secret().as_bytes();
    match presented_token(headers) {
        Some(token) if constant_time_eq(token.as_bytes(), expected) => Ok(()),
        Some(_) => {
            warn!("Rejected request with invalid credential");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "invalid credential",
            ))
        }
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing credential",
        )),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Inspection ──────────────────────────────────────────────────────────

async fn list_streams(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    match state.store.list_states().await {
        Ok(states) => Json(json!({ "streams": states })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list stream states");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "persistence", &e.to_string())
        }
    }
}

async fn get_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    match state.store.get_state(&StreamKey::new(key.clone())).await {
        Ok(Some(stream)) => Json(stream).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("no state for stream {key}"),
        ),
        Err(e) => {
            error!(stream_key = %key, error = %e, "Failed to load stream state");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "persistence", &e.to_string())
        }
    }
}
