//! Event sources and the UI message contract

use super::AppState;
use crate::dispatch::dispatch;
use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tabtrace_common::{EventBatch, Message, Reply, TabEvent};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", post(ingest_events))
        .route("/api/tabs", post(tab_event))
        .route("/api/message", post(handle_message))
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    accepted: usize,
    changed: usize,
}

/// Lifecycle events from the network observation hooks, one or many per body
async fn ingest_events(
    State(state): State<AppState>,
    Json(batch): Json<EventBatch>,
) -> Json<IngestResponse> {
    let events = batch.into_events();
    let accepted = events.len();
    let mut changed = 0;
    for event in events {
        if state.reconciler.handle_event(event).await.changed() {
            changed += 1;
        }
    }
    Json(IngestResponse { accepted, changed })
}

#[derive(Debug, Serialize)]
struct TabEventResponse {
    outcome: &'static str,
}

async fn tab_event(
    State(state): State<AppState>,
    Json(event): Json<TabEvent>,
) -> Json<TabEventResponse> {
    let outcome = state.reconciler.handle_tab_event(event).await;
    Json(TabEventResponse {
        outcome: outcome.label(),
    })
}

async fn handle_message(
    State(state): State<AppState>,
    Json(message): Json<Message>,
) -> Json<Reply> {
    Json(dispatch(&state.reconciler, message).await)
}
