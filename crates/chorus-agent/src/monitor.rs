//! Session monitor — drives a [`TurnMachine`] from document mutations.
//!
//! One tokio task per session. It re-extracts on every mutation batch, runs
//! the quiet-period and cool-down timers, and forwards completed turns to a
//! [`TurnSink`]. Stopping the monitor ends the task before `stop` returns,
//! taking any armed timer with it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{Error, Result};
use chorus_protocol::{
    CompletedTurn, ControllerReply, ExtractedMessage, ObservedPrompt, SiteAdapter,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::document::{Document, MutationStream};
use crate::machine::{Step, TurnMachine};
use crate::oracle;
use crate::strategy::Extractor;

/// Where the agent reports to. Delivery is best-effort.
#[async_trait]
pub trait TurnSink: Send + Sync {
    async fn turn_completed(&self, turn: CompletedTurn) -> Result<ControllerReply>;

    async fn prompt_observed(&self, prompt: ObservedPrompt) -> Result<ControllerReply>;
}

/// Remembers the last prompt this agent injected, so a prompt seen in the
/// page can be told apart from one typed by hand.
#[derive(Debug, Clone, Default)]
pub struct PromptLedger {
    last_injected: Arc<Mutex<Option<String>>>,
}

impl PromptLedger {
    pub fn record(&self, prompt: &str) {
        *self.last_injected.lock() = Some(prompt.trim().to_string());
    }

    pub fn was_injected(&self, prompt: &str) -> bool {
        self.last_injected.lock().as_deref() == Some(prompt.trim())
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub session_index: usize,
    pub adapter: SiteAdapter,
    pub quiet_period: Duration,
    pub cooldown: Duration,
    pub delivery_timeout: Duration,
}

/// Handle to a running monitor task.
pub struct Monitor {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Monitor {
    pub fn spawn<D>(
        doc: Arc<D>,
        mutations: MutationStream,
        config: MonitorConfig,
        sink: Arc<dyn TurnSink>,
        ledger: PromptLedger,
    ) -> Self
    where
        D: Document + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = MonitorTask {
            extractor: Extractor::for_adapter(config.adapter.selectors.clone()),
            machine: TurnMachine::new(config.session_index),
            doc,
            config,
            sink,
            ledger,
        };
        let task = tokio::spawn(task.run(mutations, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // A monitor dropped without stop() must not keep emitting
        self.task.abort();
    }
}

struct MonitorTask<D> {
    doc: Arc<D>,
    extractor: Extractor,
    machine: TurnMachine,
    config: MonitorConfig,
    sink: Arc<dyn TurnSink>,
    ledger: PromptLedger,
}

/// An instant far enough away to stand in for "no deadline".
fn parked(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
}

impl<D: Document + 'static> MonitorTask<D> {
    fn latest(&self) -> Option<Vec<ExtractedMessage>> {
        let (strategy, messages) = self.extractor.extract(&*self.doc)?;
        debug!(
            session = self.config.session_index,
            strategy,
            count = messages.len(),
            "extracted messages"
        );
        Some(messages)
    }

    async fn run(mut self, mut mutations: MutationStream, mut stop_rx: oneshot::Receiver<()>) {
        let index = self.config.session_index;
        info!(session = index, adapter = %self.config.adapter.name, "Monitoring started");

        if let Some(existing) = self.latest() {
            self.machine.prime(&existing);
        }

        let mut quiet_deadline: Option<Instant> = None;
        let mut cooldown_deadline: Option<Instant> = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                batch = mutations.next() => match batch {
                    Some(_) => match self.latest() {
                        Some(messages) => match messages.last() {
                            Some(last) => {
                                let doc = &*self.doc;
                                let signals = &self.config.adapter.detection;
                                self.machine.observe(last, || oracle::assess(doc, signals))
                            }
                            None => Step::Unchanged,
                        },
                        None => Step::Unchanged,
                    },
                    None => {
                        debug!(session = index, "mutation stream closed");
                        break;
                    }
                },
                _ = sleep_until(parked(quiet_deadline)), if quiet_deadline.is_some() => {
                    quiet_deadline = None;
                    self.machine.quiet_period_elapsed()
                }
                _ = sleep_until(parked(cooldown_deadline)), if cooldown_deadline.is_some() => {
                    cooldown_deadline = None;
                    self.machine.release();
                    Step::Unchanged
                }
            };

            match step {
                Step::Unchanged => {}
                Step::ArmQuietPeriod => {
                    quiet_deadline = Some(Instant::now() + self.config.quiet_period);
                }
                Step::PromptRecorded(prompt) => {
                    quiet_deadline = None;
                    if !self.ledger.was_injected(&prompt) {
                        let observed = ObservedPrompt::manual(index, prompt);
                        if until_stopped(&mut stop_rx, self.report_prompt(observed))
                            .await
                            .is_none()
                        {
                            break;
                        }
                    }
                }
                Step::Discarded => {
                    quiet_deadline = None;
                    debug!(session = index, "response without a recorded prompt dropped");
                }
                Step::Emit(turn) => {
                    quiet_deadline = None;
                    if until_stopped(&mut stop_rx, self.forward(turn)).await.is_none() {
                        break;
                    }
                    // Released only after the forward resolved, one way or the other
                    cooldown_deadline = Some(Instant::now() + self.config.cooldown);
                }
            }
        }

        info!(session = index, "Monitoring stopped");
    }

    async fn forward(&self, turn: CompletedTurn) {
        let index = turn.session_index;
        match timeout(self.config.delivery_timeout, self.sink.turn_completed(turn)).await {
            Ok(Ok(reply)) => debug!(session = index, ?reply, "turn delivered"),
            Ok(Err(e)) => warn!(session = index, "Turn delivery failed: {}", e),
            Err(_) => warn!(session = index, "Turn delivery timed out"),
        }
    }

    /// One bounded retry: a manually typed prompt is only seen once.
    async fn report_prompt(&self, observed: ObservedPrompt) {
        for attempt in 1..=2 {
            let result = timeout(
                self.config.delivery_timeout,
                self.sink.prompt_observed(observed.clone()),
            )
            .await
            .unwrap_or_else(|_| Err(Error::Timeout("prompt report".into())));
            match result {
                Ok(reply) => {
                    debug!(session = observed.session_index, ?reply, "manual prompt reported");
                    return;
                }
                Err(e) => warn!(
                    session = observed.session_index,
                    attempt, "Manual prompt report failed: {}", e
                ),
            }
        }
    }
}

/// Run `work` unless a stop arrives first. `None` means stopped.
async fn until_stopped<F: Future<Output = ()>>(
    stop_rx: &mut oneshot::Receiver<()>,
    work: F,
) -> Option<()> {
    tokio::select! {
        biased;
        _ = stop_rx => None,
        _ = work => Some(()),
    }
}
