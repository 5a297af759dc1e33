//! WebSocket relay between the controller and its remote peers.
//!
//! Two kinds of peers connect: the hosting shell (one at a time), which owns
//! windows and can load the agent into a page, and the agents themselves, one
//! socket per agent handle. Requests carry a correlation id; the reply is
//! matched back through a pending map and every wait is bounded.

use std::time::Duration;

use async_trait::async_trait;
use chorus_browser::{AgentChannel, CreatedSession, SessionHost, WindowBounds};
use chorus_core::{Error, Result};
use chorus_protocol::{
    AdapterTable, AgentReply, AgentRequest, ControllerReply, ShellCommand, ToAgent, ToShell,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Answer to a [`ShellCommand`].
#[derive(Debug, Clone)]
pub struct ShellReply {
    pub ok: bool,
    pub result: serde_json::Value,
    pub error: Option<String>,
}

// ---------------------------------------------------------------
// Relay
// ---------------------------------------------------------------

/// Outbound half of a connected socket.
#[derive(Clone)]
pub struct Peer {
    pub conn: String,
    tx: mpsc::UnboundedSender<String>,
}

impl Peer {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn: uuid::Uuid::new_v4().to_string(),
            tx,
        }
    }

    fn send<T: Serialize>(&self, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.tx
            .send(text)
            .map_err(|_| Error::Transport("peer disconnected".into()))
    }
}

/// A registered wait for a correlated reply. The entry leaves the map when
/// the guard drops, whichever way the waiting call ends.
struct PendingEntry<'a, T> {
    map: &'a DashMap<String, oneshot::Sender<T>>,
    id: String,
}

impl<'a, T> PendingEntry<'a, T> {
    fn register(map: &'a DashMap<String, oneshot::Sender<T>>) -> (Self, oneshot::Receiver<T>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        map.insert(id.clone(), tx);
        (Self { map, id }, rx)
    }
}

impl<T> Drop for PendingEntry<'_, T> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

pub struct Relay {
    shell: RwLock<Option<Peer>>,
    agents: DashMap<String, Peer>,
    shell_pending: DashMap<String, oneshot::Sender<ShellReply>>,
    agent_pending: DashMap<String, oneshot::Sender<AgentReply>>,
    adapters: AdapterTable,
    shell_timeout: Duration,
}

impl Relay {
    pub fn new(adapters: AdapterTable, shell_timeout: Duration) -> Self {
        Self {
            shell: RwLock::new(None),
            agents: DashMap::new(),
            shell_pending: DashMap::new(),
            agent_pending: DashMap::new(),
            adapters,
            shell_timeout,
        }
    }

    pub fn adapters(&self) -> &AdapterTable {
        &self.adapters
    }

    // -- connections ------------------------------------------------

    /// Register the shell, replacing any previous connection.
    pub fn attach_shell(&self, peer: Peer) {
        if self.shell.write().replace(peer).is_some() {
            warn!("Shell reconnected, previous connection replaced");
        } else {
            info!("Shell connected");
        }
    }

    /// Forget the shell if `conn` is still the current connection.
    pub fn detach_shell(&self, conn: &str) {
        let mut shell = self.shell.write();
        if shell.as_ref().is_some_and(|p| p.conn == conn) {
            *shell = None;
            info!("Shell disconnected");
        }
    }

    pub fn shell_connected(&self) -> bool {
        self.shell.read().is_some()
    }

    pub fn attach_agent(&self, handle: &str, peer: Peer) {
        self.agents.insert(handle.to_string(), peer);
        info!(handle, "Agent connected");
    }

    pub fn detach_agent(&self, handle: &str, conn: &str) {
        if self.agents.remove_if(handle, |_, p| p.conn == conn).is_some() {
            info!(handle, "Agent disconnected");
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // -- inbound ----------------------------------------------------

    pub fn resolve_shell(&self, id: &str, reply: ShellReply) {
        match self.shell_pending.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "late or unknown shell reply"),
        }
    }

    pub fn resolve_agent(&self, id: &str, reply: AgentReply) {
        match self.agent_pending.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "late or unknown agent reply"),
        }
    }

    /// Answer an agent's report on its own socket.
    pub fn ack_agent(&self, handle: &str, id: String, reply: ControllerReply) {
        if let Some(peer) = self.agents.get(handle) {
            if let Err(e) = peer.send(&ToAgent::Ack { id, reply }) {
                debug!(handle, "ack not delivered: {}", e);
            }
        }
    }

    // -- outbound ---------------------------------------------------

    async fn shell_call(&self, command: ShellCommand) -> Result<serde_json::Value> {
        let peer = self
            .shell
            .read()
            .clone()
            .ok_or_else(|| Error::Transport("shell not connected".into()))?;

        let (pending, rx) = PendingEntry::register(&self.shell_pending);
        peer.send(&ToShell::Request {
            id: pending.id.clone(),
            command,
        })?;

        let reply = match tokio::time::timeout(self.shell_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Transport("shell dropped the request".into())),
            Err(_) => return Err(Error::Timeout("shell request".into())),
        };
        if reply.ok {
            Ok(reply.result)
        } else {
            Err(Error::Transport(
                reply.error.unwrap_or_else(|| "shell reported failure".into()),
            ))
        }
    }
}

#[async_trait]
impl SessionHost for Relay {
    async fn create_session(&self, url: &str, bounds: WindowBounds) -> Result<CreatedSession> {
        let result = self
            .shell_call(ShellCommand::CreateSession {
                url: url.to_string(),
                bounds,
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let result = self
            .shell_call(ShellCommand::SessionExists {
                session_id: session_id.to_string(),
            })
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.shell_call(ShellCommand::CloseSession {
            session_id: session_id.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn install_agent(&self, agent_handle: &str, adapter_key: &str) -> Result<()> {
        self.shell_call(ShellCommand::InstallAgent {
            agent_handle: agent_handle.to_string(),
            adapter: self.adapters.resolve(adapter_key),
        })
        .await
        .map_err(|e| Error::InjectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AgentChannel for Relay {
    async fn send(
        &self,
        agent_handle: &str,
        request: AgentRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        let peer = self
            .agents
            .get(agent_handle)
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::SessionUnreachable(format!("{} not connected", agent_handle)))?;

        let verb = request.verb();
        let (pending, rx) = PendingEntry::register(&self.agent_pending);
        peer.send(&ToAgent::Request {
            id: pending.id.clone(),
            request,
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport(format!("{} dropped {}", agent_handle, verb))),
            Err(_) => Err(Error::Timeout(format!("{} to {}", verb, agent_handle))),
        }
    }
}
