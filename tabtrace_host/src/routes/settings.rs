//! URL history, session log lookups, settings and health

use super::AppState;
use crate::error::SettingsError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tabtrace_common::constants::SERVICE_NAME;
use tabtrace_common::{Ack, Session, UrlHistoryEntry};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/history", get(url_history))
        .route("/api/sessions/{id}", get(logged_session))
        .route(
            "/api/settings/history-size",
            get(get_history_size).put(set_history_size),
        )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    service: &'static str,
    version: &'static str,
    active_sessions: usize,
    capture_mode: &'static str,
    /// Whether recorded data survives a host restart
    persistent: bool,
}

/// Health check, also used by the CLI to find the host
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_sessions = state.reconciler.active_sessions().await.len();
    let capture_mode = state.capture.current().await.as_str();
    Json(HealthResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        active_sessions,
        capture_mode,
        persistent: !state.config.ephemeral,
    })
}

async fn url_history(State(state): State<AppState>) -> Json<Vec<UrlHistoryEntry>> {
    Json(state.reconciler.gateway().get_url_history().await)
}

async fn logged_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.reconciler.gateway().get_session_by_id(&id).await {
        Some(session) => Json::<Session>(session).into_response(),
        None => (StatusCode::NOT_FOUND, Json(Ack::failed("Session not found"))).into_response(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HistorySize {
    size: usize,
}

async fn get_history_size(State(state): State<AppState>) -> Json<HistorySize> {
    Json(HistorySize {
        size: state.reconciler.gateway().get_max_history_size().await,
    })
}

async fn set_history_size(
    State(state): State<AppState>,
    Json(body): Json<HistorySize>,
) -> Response {
    match state.reconciler.gateway().set_max_history_size(body.size).await {
        Ok(()) => Json(body).into_response(),
        Err(e @ SettingsError::HistorySizeOutOfRange { .. }) => {
            (StatusCode::BAD_REQUEST, Json(Ack::failed(e))).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to save history size: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Ack::failed(e))).into_response()
        }
    }
}
