//! Session agent — answers controller verbs inside one page context.

use std::sync::Arc;

use chorus_core::Timing;
use chorus_protocol::{AdapterTable, AgentReply, AgentRequest};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::document::Page;
use crate::inject::inject_prompt;
use crate::monitor::{Monitor, MonitorConfig, PromptLedger, TurnSink};

pub struct SessionAgent<P: Page + 'static> {
    page: Arc<P>,
    adapters: AdapterTable,
    sink: Arc<dyn TurnSink>,
    timing: Timing,
    ledger: PromptLedger,
    monitor: Mutex<Option<Monitor>>,
}

impl<P: Page + 'static> SessionAgent<P> {
    pub fn new(page: Arc<P>, adapters: AdapterTable, sink: Arc<dyn TurnSink>, timing: Timing) -> Self {
        Self {
            page,
            adapters,
            sink,
            timing,
            ledger: PromptLedger::default(),
            monitor: Mutex::new(None),
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .map(Monitor::is_running)
            .unwrap_or(false)
    }

    /// Answer one controller request.
    pub async fn handle(&self, request: AgentRequest) -> AgentReply {
        match request {
            AgentRequest::Probe => AgentReply::Ready,
            AgentRequest::StartSession {
                session_index,
                adapter_key,
            } => {
                self.start_monitoring(session_index, &adapter_key).await;
                AgentReply::Accepted
            }
            AgentRequest::StopSession => {
                self.stop_monitoring().await;
                AgentReply::Accepted
            }
            AgentRequest::SubmitPrompt {
                prompt,
                transform,
                session_index,
                adapter_key,
            } => {
                let adapter = self.adapters.resolve(&adapter_key);
                // Recorded first so the monitor never mistakes it for a typed prompt
                self.ledger.record(&prompt);
                let outcome = inject_prompt(&*self.page, &adapter, &prompt);
                if outcome.success {
                    info!(
                        session = session_index,
                        transform = %format!("{}/{}", transform.category, transform.method),
                        method = ?outcome.method,
                        "Prompt submitted"
                    );
                } else {
                    warn!(
                        session = session_index,
                        "Prompt submission failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                AgentReply::Submit(outcome)
            }
        }
    }

    /// (Re)start the monitor. A running one is stopped first so there is
    /// never more than one observer per page.
    async fn start_monitoring(&self, session_index: usize, adapter_key: &str) {
        let mut slot = self.monitor.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }
        let config = MonitorConfig {
            session_index,
            adapter: self.adapters.resolve(adapter_key),
            quiet_period: self.timing.quiet_period(),
            cooldown: self.timing.emit_cooldown(),
            delivery_timeout: self.timing.delivery_timeout(),
        };
        *slot = Some(Monitor::spawn(
            self.page.clone(),
            self.page.mutations(),
            config,
            self.sink.clone(),
            self.ledger.clone(),
        ));
    }

    /// Stop monitoring for good, e.g. once the controller connection is gone.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
    }

    async fn stop_monitoring(&self) {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
        }
    }
}
