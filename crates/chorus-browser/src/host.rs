//! Interfaces to the hosting shell and to the session agents.
//!
//! The controller never touches windows or page contexts directly. The
//! server binary implements both traits over its WebSocket relay; tests use
//! in-process fakes.

use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{Error, Result};
use chorus_protocol::{AgentReply, AgentRequest};
use serde::{Deserialize, Serialize};

use crate::layout::WindowBounds;

/// What the host hands back for a newly created session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    #[serde(rename = "agentHandle")]
    pub agent_handle: String,
}

/// Window/tab lifecycle and agent installation.
#[async_trait]
pub trait SessionHost: Send + Sync {
    async fn create_session(&self, url: &str, bounds: WindowBounds) -> Result<CreatedSession>;

    /// Whether the host still has this session open.
    async fn session_exists(&self, session_id: &str) -> Result<bool>;

    async fn close_session(&self, session_id: &str) -> Result<()>;

    /// Load the agent into a page context. Must be idempotent.
    async fn install_agent(&self, agent_handle: &str, adapter_key: &str) -> Result<()>;
}

/// Request/response channel to the agent in a page context.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Send `request` and wait at most `timeout` for the reply.
    async fn send(
        &self,
        agent_handle: &str,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<AgentReply>;
}

/// Send through `channel`, with `timeout` also enforced on this side.
pub async fn call_agent(
    channel: &dyn AgentChannel,
    agent_handle: &str,
    request: AgentRequest,
    timeout: Duration,
) -> Result<AgentReply> {
    let verb = request.verb();
    tokio::time::timeout(timeout, channel.send(agent_handle, request, timeout))
        .await
        .map_err(|_| Error::Timeout(format!("{} to {}", verb, agent_handle)))?
}
