//! Makes sure a session's agent is present and answering.
//!
//! Probe first. Install only when the agent has never been marked as
//! installed; a marked agent that stops answering is reported as failed
//! rather than installed a second time, which would leave two observers on
//! the same page.

use std::sync::Arc;
use std::time::Duration;

use chorus_protocol::{AgentReply, AgentRequest, Session};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::host::{call_agent, AgentChannel, SessionHost};
use crate::registry::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Liveness {
    LiveWithoutAction,
    LiveAfterInstall,
    Failed,
}

impl Liveness {
    pub fn is_live(self) -> bool {
        !matches!(self, Liveness::Failed)
    }
}

pub struct Handshake {
    store: Arc<SessionStore>,
    host: Arc<dyn SessionHost>,
    agents: Arc<dyn AgentChannel>,
    install_settle: Duration,
    /// One lock per agent handle: attempts on the same session never overlap.
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Handshake {
    pub fn new(
        store: Arc<SessionStore>,
        host: Arc<dyn SessionHost>,
        agents: Arc<dyn AgentChannel>,
        install_settle: Duration,
    ) -> Self {
        Self {
            store,
            host,
            agents,
            install_settle,
            in_flight: DashMap::new(),
        }
    }

    pub async fn ensure_live(&self, session: &Session, timeout: Duration) -> Liveness {
        let handle = session.agent_handle.as_str();
        let lock = self.in_flight.entry(handle.to_string()).or_default().clone();
        let _attempt = lock.lock().await;

        if self.probe(handle, timeout).await {
            if !self.store.is_injected(handle) {
                // Answered without us installing it: loaded by the page itself
                debug!(session = session.index, handle, "agent present without install");
                self.store.mark_injected(handle);
            }
            return Liveness::LiveWithoutAction;
        }

        if self.store.is_injected(handle) {
            warn!(session = session.index, handle, "Installed agent is not answering");
            return Liveness::Failed;
        }

        if let Err(e) = self.host.install_agent(handle, &session.adapter_key).await {
            warn!(session = session.index, handle, "Agent install failed: {}", e);
            return Liveness::Failed;
        }
        self.store.mark_injected(handle);
        tokio::time::sleep(self.install_settle).await;

        if self.probe(handle, timeout).await {
            info!(session = session.index, handle, "Agent installed");
            Liveness::LiveAfterInstall
        } else {
            warn!(session = session.index, handle, "Agent installed but not answering");
            Liveness::Failed
        }
    }

    /// Drop the per-handle lock of a session that is gone.
    pub fn forget(&self, agent_handle: &str) {
        self.in_flight.remove(agent_handle);
    }

    async fn probe(&self, handle: &str, timeout: Duration) -> bool {
        match call_agent(&*self.agents, handle, AgentRequest::Probe, timeout).await {
            Ok(AgentReply::Ready) => true,
            Ok(other) => {
                debug!(handle, ?other, "unexpected probe reply");
                false
            }
            Err(e) => {
                debug!(handle, "probe failed: {}", e);
                false
            }
        }
    }
}
