//! Agent reports, the turn backlog, and controller status.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chorus_browser::Backlog;
use chorus_protocol::{CompletedTurn, ControllerReply, ControllerRequest, ObservedPrompt};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agent/turn-completed", post(turn_completed))
        .route("/agent/prompt-observed", post(prompt_observed))
        .route("/turns", get(list_turns))
        .route("/turns/drain", post(drain_turns))
        .route("/status", get(status))
}

/// Apply an agent report, whichever transport it came in on.
pub(crate) fn handle_report(state: &AppState, request: ControllerRequest) -> ControllerReply {
    let aggregator = state.controller.aggregator();
    match request {
        ControllerRequest::TurnCompleted(turn) => aggregator.report(turn),
        ControllerRequest::PromptObservedManually(prompt) => aggregator.observe_prompt(prompt),
    }
}

async fn turn_completed(
    State(state): State<Arc<AppState>>,
    Json(turn): Json<CompletedTurn>,
) -> Json<ControllerReply> {
    Json(handle_report(&state, ControllerRequest::TurnCompleted(turn)))
}

async fn prompt_observed(
    State(state): State<Arc<AppState>>,
    Json(prompt): Json<ObservedPrompt>,
) -> Json<ControllerReply> {
    Json(handle_report(
        &state,
        ControllerRequest::PromptObservedManually(prompt),
    ))
}

async fn list_turns(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let aggregator = state.controller.aggregator();
    let turns = aggregator.list();
    Json(serde_json::json!({
        "count": turns.len(),
        "turns": turns,
        "prompts": aggregator.observed_prompts(),
    }))
}

async fn drain_turns(State(state): State<Arc<AppState>>) -> Json<Backlog> {
    Json(state.controller.aggregator().drain())
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let store = state.controller.store();
    Json(serde_json::json!({
        "sessions": store.len(),
        "injected": store.injected_count(),
        "pendingTurns": state.controller.aggregator().pending_count(),
        "shellConnected": state.relay.shell_connected(),
        "agentsConnected": state.relay.agent_count(),
        "adapters": state.relay.adapters().keys(),
        "startedAt": state.started_at,
        "port": state.config.port,
    }))
}
