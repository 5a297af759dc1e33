//! Session batch routes: open, list, close.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chorus_protocol::{Session, GENERIC_ADAPTER};
use serde::{Deserialize, Serialize};

use super::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/sessions",
            get(list_sessions).post(open_sessions).delete(close_sessions),
        )
        .route("/sessions/{id}", get(get_session))
}

#[derive(Debug, Deserialize)]
struct OpenBody {
    count: usize,
    url: String,
    #[serde(rename = "adapterKey")]
    adapter_key: Option<String>,
}

#[derive(Serialize)]
struct SessionList {
    sessions: Vec<Session>,
}

async fn open_sessions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OpenBody>,
) -> impl IntoResponse {
    let adapter_key = body.adapter_key.as_deref().unwrap_or(GENERIC_ADAPTER);
    match state
        .controller
        .registry()
        .open_batch(body.count, &body.url, adapter_key)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::to_value(report).unwrap_or_default()),
        ),
        Err(e) => error_response(&e),
    }
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.controller.registry().list(),
    })
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.registry().get(&id) {
        Ok(session) => (
            StatusCode::OK,
            Json(serde_json::to_value(session).unwrap_or_default()),
        ),
        Err(e) => error_response(&e),
    }
}

async fn close_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let closed = state.controller.registry().close_all().await;
    Json(serde_json::json!({ "success": true, "closed": closed }))
}
