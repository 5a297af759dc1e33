//! HTTP and WebSocket routes.

pub mod agent;
pub mod dispatch;
pub mod sessions;
pub mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chorus_core::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/shell", get(ws::shell_socket))
        .route("/ws/agent/{handle}", get(ws::agent_socket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(sessions::routes())
        .merge(dispatch::routes())
        .merge(agent::routes())
}

/// Map a controller error onto a status code and `{ error, kind }` body.
pub(crate) fn error_response(err: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let (status, kind) = match err {
        Error::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalidUrl"),
        Error::NoSessionsOpen => (StatusCode::CONFLICT, "noSessionsOpen"),
        Error::NoSessionsCreated { .. } => (StatusCode::BAD_GATEWAY, "noSessionsCreated"),
        Error::SessionUnreachable(_) | Error::InjectionFailed(_) => {
            (StatusCode::BAD_GATEWAY, "sessionUnreachable")
        }
        Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "notFound"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(serde_json::json!({ "error": err.to_string(), "kind": kind })),
    )
}
