//! Manual request actions and saved presets

use super::{action_error_response, AppState};
use crate::actions::RequestForm;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tabtrace_common::{Ack, RequestPreset, TabId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/actions/replay", post(replay))
        .route("/api/actions/modify", post(modify))
        .route("/api/actions/build", post(build))
        .route("/api/presets", get(list_presets).post(save_preset))
        .route("/api/presets/{id}", delete(delete_preset))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBody {
    tab_id: TabId,
    call_id: String,
}

/// Replay a recorded call
async fn replay(State(state): State<AppState>, Json(body): Json<ReplayBody>) -> Response {
    match state.actions.replay(body.tab_id, &body.call_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => action_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyBody {
    tab_id: TabId,
    request: RequestForm,
}

async fn modify(State(state): State<AppState>, Json(body): Json<ModifyBody>) -> Response {
    match state.actions.modify(body.tab_id, &body.request).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => action_error_response(e),
    }
}

/// Either an inline request or a saved preset
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildBody {
    tab_id: TabId,
    #[serde(default)]
    request: Option<RequestForm>,
    #[serde(default)]
    preset_id: Option<String>,
}

async fn build(State(state): State<AppState>, Json(body): Json<BuildBody>) -> Response {
    let result = match (&body.preset_id, &body.request) {
        (Some(preset_id), _) => state.actions.build_from_preset(body.tab_id, preset_id).await,
        (None, Some(form)) => state.actions.build(body.tab_id, form).await,
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(Ack::failed("Either request or presetId is required")),
            )
                .into_response()
        }
    };
    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => action_error_response(e),
    }
}

async fn list_presets(State(state): State<AppState>) -> Json<Vec<RequestPreset>> {
    Json(state.reconciler.gateway().get_presets().await)
}

#[derive(Debug, Deserialize)]
pub struct SavePresetBody {
    name: String,
    #[serde(flatten)]
    form: RequestForm,
}

/// Save a preset; the form must be sendable as-is
async fn save_preset(State(state): State<AppState>, Json(body): Json<SavePresetBody>) -> Response {
    if body.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(Ack::failed("Preset name is required"))).into_response();
    }
    if let Err(e) = body.form.validate() {
        return action_error_response(e);
    }

    let preset = RequestPreset::new(
        body.name.trim().to_string(),
        body.form.method.to_ascii_uppercase(),
        body.form.url,
        body.form.headers,
        body.form.body,
    );
    match state.reconciler.gateway().save_preset(&preset).await {
        Ok(()) => (StatusCode::CREATED, Json(preset)).into_response(),
        Err(e) => {
            tracing::error!("Failed to save preset: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Ack::failed(e))).into_response()
        }
    }
}

async fn delete_preset(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.reconciler.gateway().delete_preset(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, Json(Ack::failed("Preset not found"))).into_response(),
        Err(e) => {
            tracing::error!("Failed to delete preset {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Ack::failed(e))).into_response()
        }
    }
}
