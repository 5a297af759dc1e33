//! WebSocket endpoints for the hosting shell and the session agents.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chorus_protocol::{FromAgent, FromShell};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::agent::handle_report;
use crate::relay::{Peer, ShellReply};
use crate::state::AppState;

pub async fn shell_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_shell(socket, state))
}

pub async fn agent_socket(
    ws: WebSocketUpgrade,
    Path(handle): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_agent(socket, handle, state))
}

/// Split the socket and pump outbound frames from a channel.
fn split(socket: WebSocket) -> (Peer, futures::stream::SplitStream<WebSocket>, tokio::task::JoinHandle<()>) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });
    (Peer::new(tx), receiver, write_task)
}

async fn serve_shell(socket: WebSocket, state: Arc<AppState>) {
    let (peer, mut receiver, write_task) = split(socket);
    let conn = peer.conn.clone();
    state.relay.attach_shell(peer);

    // The host is reachable again: drop whatever it lost while we were apart
    let reconcile_state = state.clone();
    tokio::spawn(async move {
        reconcile_state
            .controller
            .registry()
            .reconcile_on_startup()
            .await;
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("shell read error: {}", e);
                break;
            }
        };
        match serde_json::from_str::<FromShell>(&text) {
            Ok(FromShell::Reply {
                id,
                ok,
                result,
                error,
            }) => state.relay.resolve_shell(&id, ShellReply { ok, result, error }),
            Ok(FromShell::SessionClosed { session_id }) => {
                state.controller.on_session_closed(&session_id);
            }
            Err(e) => warn!("Invalid shell frame: {}", e),
        }
    }

    state.relay.detach_shell(&conn);
    write_task.abort();
}

async fn serve_agent(socket: WebSocket, handle: String, state: Arc<AppState>) {
    let (peer, mut receiver, write_task) = split(socket);
    let conn = peer.conn.clone();
    state.relay.attach_agent(&handle, peer);

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(handle = %handle, "agent read error: {}", e);
                break;
            }
        };
        match serde_json::from_str::<FromAgent>(&text) {
            Ok(FromAgent::Reply { id, reply }) => state.relay.resolve_agent(&id, reply),
            Ok(FromAgent::Report { id, request }) => {
                let reply = handle_report(&state, request);
                state.relay.ack_agent(&handle, id, reply);
            }
            Err(e) => warn!(handle = %handle, "Invalid agent frame: {}", e),
        }
    }

    state.relay.detach_agent(&handle, &conn);
    write_task.abort();
}
