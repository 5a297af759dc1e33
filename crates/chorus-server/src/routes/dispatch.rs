//! Prompt dispatch and monitoring control.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chorus_browser::DispatchResult;
use chorus_core::Result;
use chorus_protocol::TransformSpec;
use serde::Deserialize;

use super::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dispatch", post(dispatch))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop", post(stop_monitoring))
}

#[derive(Debug, Deserialize)]
struct DispatchBody {
    prompt: String,
    /// Keyed by session index; missing entries mean no transform.
    #[serde(default)]
    transforms: HashMap<usize, TransformSpec>,
}

fn respond(result: Result<DispatchResult>) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::to_value(result).unwrap_or_default()),
        ),
        Err(e) => error_response(&e),
    }
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DispatchBody>,
) -> impl IntoResponse {
    if body.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "prompt is empty" })),
        );
    }
    respond(
        state
            .controller
            .dispatcher()
            .dispatch(&body.prompt, &body.transforms)
            .await,
    )
}

async fn start_monitoring(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    respond(state.controller.dispatcher().start_monitoring().await)
}

async fn stop_monitoring(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    respond(state.controller.dispatcher().stop_monitoring().await)
}
