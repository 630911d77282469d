//! HTTP and WebSocket surface of the host

pub mod actions;
pub mod analytics;
pub mod ingest;
pub mod live;
pub mod settings;

use crate::actions::{ActionService, Transport};
use crate::analytics::AnalyticsService;
use crate::capture::CaptureModePolicy;
use crate::config::Config;
use crate::error::ActionError;
use crate::persistence::{KvStore, StorageGateway};
use crate::reconciler::Reconciler;
use crate::tabs::TabRegistry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use std::sync::Arc;
use tabtrace_common::Ack;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub reconciler: Arc<Reconciler>,
    pub capture: Arc<CaptureModePolicy>,
    pub analytics: Arc<AnalyticsService>,
    pub actions: Arc<ActionService>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn KvStore>, transport: Arc<dyn Transport>) -> Self {
        let gateway = StorageGateway::with_session_limit(store, config.max_stored_sessions);
        let capture = Arc::new(CaptureModePolicy::new(
            gateway.clone(),
            config.capture_mode_ttl,
        ));
        let tabs = Arc::new(TabRegistry::new());
        let reconciler = Arc::new(Reconciler::new(gateway.clone(), capture.clone(), tabs));
        let analytics = Arc::new(AnalyticsService::with_freshness(
            gateway,
            config.analytics_freshness_ms,
        ));
        let actions = Arc::new(ActionService::new(reconciler.clone(), transport));

        Self {
            config: Arc::new(config),
            reconciler,
            capture,
            analytics,
            actions,
        }
    }
}

/// Full router with tracing and CORS layers
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(ingest::router())
        .merge(analytics::router())
        .merge(actions::router())
        .merge(settings::router())
        .merge(live::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Status code and `{"success": false, "error": ...}` body for a failed action
pub(crate) fn action_error_response(error: ActionError) -> Response {
    let status = match &error {
        ActionError::MissingUrl
        | ActionError::InvalidUrl(_)
        | ActionError::InvalidMethod(_)
        | ActionError::InvalidHeaders(_) => StatusCode::BAD_REQUEST,
        ActionError::CallNotFound(_)
        | ActionError::PresetNotFound(_)
        | ActionError::NoSession(_) => StatusCode::NOT_FOUND,
        ActionError::Network(_) => StatusCode::BAD_GATEWAY,
        ActionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(Ack::failed(error))).into_response()
}
