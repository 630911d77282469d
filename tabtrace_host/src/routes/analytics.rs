//! Windowed analytics endpoint

use super::AppState;
use crate::analytics::{AnalyticsScope, AnalyticsView, TimeWindow};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tabtrace_common::{Ack, TabId};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/analytics", get(get_analytics))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    tab_id: Option<TabId>,
    window: Option<String>,
}

/// Analytics for one tab (`tabId`) or for every active session
async fn get_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let window = match query.window.as_deref().map(str::parse::<TimeWindow>) {
        None => TimeWindow::All,
        Some(Ok(window)) => window,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, Json(Ack::failed(e))).into_response(),
    };
    let scope = query.tab_id.map_or(AnalyticsScope::All, AnalyticsScope::Tab);
    tracing::debug!("Analytics for {:?} over {}", scope, window.as_str());

    let view = state.analytics.snapshot(scope, window).await;
    let status = match view {
        AnalyticsView::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(view)).into_response()
}
