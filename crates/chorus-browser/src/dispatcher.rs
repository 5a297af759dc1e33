//! Prompt dispatcher — fans one prompt out to every registered session.
//!
//! Sessions are handled one after another. Each gets a handshake, its own
//! transform of the prompt, and a bounded wait for the submit result. A
//! failing session is recorded and skipped; it never aborts the batch.
//! Monitoring start/stop fan out the same way.

use std::collections::HashMap;
use std::sync::Arc;

use chorus_core::{Error, Result, Timing};
use chorus_protocol::{
    AgentReply, AgentRequest, Session, SubmitMethod, SubmitOutcome, TransformSpec, TransformTable,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::handshake::{Handshake, Liveness};
use crate::host::{call_agent, AgentChannel};
use crate::registry::SessionStore;

/// What happened for one session of a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub session_index: usize,
    pub session_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Liveness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<SubmitMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionOutcome {
    fn ok(session: &Session, liveness: Option<Liveness>, method: Option<SubmitMethod>) -> Self {
        Self {
            session_index: session.index,
            session_id: session.id.clone(),
            success: true,
            liveness,
            method,
            error: None,
        }
    }

    fn failed(session: &Session, liveness: Option<Liveness>, error: impl ToString) -> Self {
        Self {
            session_index: session.index,
            session_id: session.id.clone(),
            success: false,
            liveness,
            method: None,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregated result of a fan-out. `success` iff at least one session succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub success: bool,
    pub success_count: usize,
    pub total_count: usize,
    pub per_session: Vec<SessionOutcome>,
}

impl DispatchResult {
    fn collect(per_session: Vec<SessionOutcome>) -> Self {
        let success_count = per_session.iter().filter(|o| o.success).count();
        Self {
            success: success_count > 0,
            success_count,
            total_count: per_session.len(),
            per_session,
        }
    }
}

pub struct Dispatcher {
    store: Arc<SessionStore>,
    handshake: Arc<Handshake>,
    agents: Arc<dyn AgentChannel>,
    transforms: TransformTable,
    timing: Timing,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        handshake: Arc<Handshake>,
        agents: Arc<dyn AgentChannel>,
        transforms: TransformTable,
        timing: Timing,
    ) -> Self {
        Self {
            store,
            handshake,
            agents,
            transforms,
            timing,
        }
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.store.list();
        if sessions.is_empty() {
            return Err(Error::NoSessionsOpen);
        }
        Ok(sessions)
    }

    /// Handshake, then bail out if the session was closed meanwhile.
    async fn prepare(&self, session: &Session) -> std::result::Result<Liveness, SessionOutcome> {
        if !self.store.contains(&session.id) {
            return Err(SessionOutcome::failed(session, None, "session closed"));
        }
        let liveness = self
            .handshake
            .ensure_live(session, self.timing.probe_timeout())
            .await;
        if !liveness.is_live() {
            return Err(SessionOutcome::failed(
                session,
                Some(liveness),
                Error::SessionUnreachable(session.agent_handle.clone()),
            ));
        }
        if !self.store.contains(&session.id) {
            return Err(SessionOutcome::failed(session, Some(liveness), "session closed"));
        }
        Ok(liveness)
    }

    /// Send `prompt` to every session, transformed per session index.
    /// Missing entries in `transforms` mean the identity transform.
    pub async fn dispatch(
        &self,
        prompt: &str,
        transforms: &HashMap<usize, TransformSpec>,
    ) -> Result<DispatchResult> {
        let sessions = self.sessions()?;
        let last = sessions.len() - 1;
        let mut outcomes = Vec::with_capacity(sessions.len());

        for (position, session) in sessions.iter().enumerate() {
            if position == last && self.timing.last_session_settle_ms > 0 {
                debug!(session = session.index, "settling before last session");
                tokio::time::sleep(self.timing.last_session_settle()).await;
            }
            let outcome = self.dispatch_one(session, prompt, transforms).await;
            if let Some(error) = &outcome.error {
                warn!(session = session.index, "Dispatch failed: {}", error);
            }
            outcomes.push(outcome);
        }

        let result = DispatchResult::collect(outcomes);
        info!(
            "Dispatched prompt: {}/{} sessions succeeded",
            result.success_count, result.total_count
        );
        Ok(result)
    }

    async fn dispatch_one(
        &self,
        session: &Session,
        prompt: &str,
        transforms: &HashMap<usize, TransformSpec>,
    ) -> SessionOutcome {
        let liveness = match self.prepare(session).await {
            Ok(l) => l,
            Err(outcome) => return outcome,
        };

        let spec = transforms.get(&session.index).cloned().unwrap_or_default();
        let request = AgentRequest::SubmitPrompt {
            prompt: self.transforms.apply(&spec, prompt),
            transform: spec,
            session_index: session.index,
            adapter_key: session.adapter_key.clone(),
        };

        match call_agent(
            &*self.agents,
            &session.agent_handle,
            request,
            self.timing.submit_timeout(),
        )
        .await
        {
            Ok(AgentReply::Submit(SubmitOutcome {
                success: true,
                method,
                ..
            })) => SessionOutcome::ok(session, Some(liveness), method),
            Ok(AgentReply::Submit(SubmitOutcome { error, .. })) => SessionOutcome::failed(
                session,
                Some(liveness),
                Error::InjectionFailed(error.unwrap_or_else(|| "submit rejected".into())),
            ),
            Ok(other) => SessionOutcome::failed(
                session,
                Some(liveness),
                format!("unexpected reply to submitPrompt: {:?}", other),
            ),
            Err(e) => SessionOutcome::failed(session, Some(liveness), e),
        }
    }

    /// Handshake every session and tell its agent to start watching.
    pub async fn start_monitoring(&self) -> Result<DispatchResult> {
        let sessions = self.sessions()?;
        let mut outcomes = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let liveness = match self.prepare(session).await {
                Ok(l) => l,
                Err(outcome) => {
                    outcomes.push(outcome);
                    continue;
                }
            };
            let request = AgentRequest::StartSession {
                session_index: session.index,
                adapter_key: session.adapter_key.clone(),
            };
            outcomes.push(self.expect_accepted(session, Some(liveness), request).await);
        }
        let result = DispatchResult::collect(outcomes);
        info!(
            "Monitoring started on {}/{} sessions",
            result.success_count, result.total_count
        );
        Ok(result)
    }

    /// Tell every agent to stop watching. No handshake: an agent that is
    /// gone has nothing left to stop.
    pub async fn stop_monitoring(&self) -> Result<DispatchResult> {
        let sessions = self.sessions()?;
        let mut outcomes = Vec::with_capacity(sessions.len());
        for session in &sessions {
            outcomes.push(
                self.expect_accepted(session, None, AgentRequest::StopSession)
                    .await,
            );
        }
        let result = DispatchResult::collect(outcomes);
        info!(
            "Monitoring stopped on {}/{} sessions",
            result.success_count, result.total_count
        );
        Ok(result)
    }

    async fn expect_accepted(
        &self,
        session: &Session,
        liveness: Option<Liveness>,
        request: AgentRequest,
    ) -> SessionOutcome {
        let verb = request.verb();
        let outcome = match call_agent(
            &*self.agents,
            &session.agent_handle,
            request,
            self.timing.probe_timeout(),
        )
        .await
        {
            Ok(AgentReply::Accepted) => SessionOutcome::ok(session, liveness, None),
            Ok(other) => {
                SessionOutcome::failed(session, liveness, format!("unexpected reply to {}: {:?}", verb, other))
            }
            Err(e) => SessionOutcome::failed(session, liveness, e),
        };
        if let Some(error) = &outcome.error {
            warn!(session = session.index, verb, "Request failed: {}", error);
        }
        outcome
    }
}
