//! Agent side of the relay socket.
//!
//! One connection per agent handle to `/ws/agent/{handle}`. Controller
//! requests are answered in arrival order; the agent's own reports travel on
//! the same socket and are matched to their acknowledgements by id.

use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::{Error, Result, Timing};
use chorus_protocol::{
    AdapterTable, CompletedTurn, ControllerReply, ControllerRequest, FromAgent, ObservedPrompt,
    ToAgent,
};
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::agent::SessionAgent;
use crate::document::Page;
use crate::monitor::TurnSink;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reports from the agent to the controller, acknowledged per id.
pub struct ControllerLink {
    outbound: mpsc::UnboundedSender<String>,
    awaiting: DashMap<String, oneshot::Sender<ControllerReply>>,
}

/// Drops the awaiting entry however the report ends, timeouts included.
struct AwaitingAck<'a> {
    link: &'a ControllerLink,
    id: String,
}

impl Drop for AwaitingAck<'_> {
    fn drop(&mut self) {
        self.link.awaiting.remove(&self.id);
    }
}

impl ControllerLink {
    fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound,
            awaiting: DashMap::new(),
        }
    }

    fn send(&self, frame: &FromAgent) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(text)
            .map_err(|_| Error::Transport("controller connection closed".into()))
    }

    async fn report(&self, request: ControllerRequest) -> Result<ControllerReply> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.awaiting.insert(id.clone(), tx);
        let guard = AwaitingAck {
            link: self,
            id: id.clone(),
        };
        self.send(&FromAgent::Report { id, request })?;
        let reply = rx
            .await
            .map_err(|_| Error::Transport("controller connection closed".into()));
        drop(guard);
        reply
    }

    fn acknowledge(&self, id: &str, reply: ControllerReply) {
        match self.awaiting.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "late or unknown acknowledgement"),
        }
    }
}

#[async_trait]
impl TurnSink for ControllerLink {
    async fn turn_completed(&self, turn: CompletedTurn) -> Result<ControllerReply> {
        self.report(ControllerRequest::TurnCompleted(turn)).await
    }

    async fn prompt_observed(&self, prompt: ObservedPrompt) -> Result<ControllerReply> {
        self.report(ControllerRequest::PromptObservedManually(prompt)).await
    }
}

/// An open agent socket, ready to serve.
pub struct AgentConnection {
    handle: String,
    link: Arc<ControllerLink>,
    inbound: SplitStream<Socket>,
    writer: JoinHandle<()>,
}

impl AgentConnection {
    /// Connect to the relay. `base` is the controller's WebSocket root,
    /// e.g. `ws://127.0.0.1:3010`.
    pub async fn connect(base: &str, agent_handle: &str) -> Result<Self> {
        let url = format!("{}/ws/agent/{}", base.trim_end_matches('/'), agent_handle);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect to {}: {}", url, e)))?;

        let (mut sender, inbound) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sender.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        });
        info!(handle = agent_handle, "Connected to controller");

        Ok(Self {
            handle: agent_handle.to_string(),
            link: Arc::new(ControllerLink::new(tx)),
            inbound,
            writer,
        })
    }

    /// Where the agent's monitor should report to.
    pub fn sink(&self) -> Arc<dyn TurnSink> {
        self.link.clone()
    }

    /// Answer controller requests until the socket closes.
    pub async fn serve<P: Page + 'static>(mut self, agent: &SessionAgent<P>) {
        while let Some(msg) = self.inbound.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(handle = %self.handle, "socket read error: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<ToAgent>(&text) {
                Ok(ToAgent::Request { id, request }) => {
                    let reply = agent.handle(request).await;
                    if let Err(e) = self.link.send(&FromAgent::Reply { id, reply }) {
                        warn!(handle = %self.handle, "Reply not sent: {}", e);
                        break;
                    }
                }
                Ok(ToAgent::Ack { id, reply }) => self.link.acknowledge(&id, reply),
                Err(e) => warn!(handle = %self.handle, "Invalid controller frame: {}", e),
            }
        }

        // Anyone still waiting for an acknowledgement gets an error now
        self.link.awaiting.clear();
        self.writer.abort();
        info!(handle = %self.handle, "Disconnected from controller");
    }
}

/// Connect `page` to the controller and serve it until the connection ends.
pub async fn run_agent<P: Page + 'static>(
    page: Arc<P>,
    base: &str,
    agent_handle: &str,
    adapters: AdapterTable,
    timing: Timing,
) -> Result<()> {
    let connection = AgentConnection::connect(base, agent_handle).await?;
    let agent = SessionAgent::new(page, adapters, connection.sink(), timing);
    connection.serve(&agent).await;
    agent.shutdown().await;
    Ok(())
}
