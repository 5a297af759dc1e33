//! Controller ⇄ agent message verbs.
//!
//! Every call is request/response; the caller enforces the timeout. Requests
//! are tagged by `verb`, replies by `status`.

use serde::{Deserialize, Serialize};

use crate::types::{CompletedTurn, ObservedPrompt, SubmitMethod, TransformSpec};

/// Controller → agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum AgentRequest {
    Probe,
    StartSession {
        #[serde(rename = "sessionIndex")]
        session_index: usize,
        #[serde(rename = "adapterKey")]
        adapter_key: String,
    },
    StopSession,
    SubmitPrompt {
        prompt: String,
        transform: TransformSpec,
        #[serde(rename = "sessionIndex")]
        session_index: usize,
        #[serde(rename = "adapterKey")]
        adapter_key: String,
    },
}

impl AgentRequest {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::StartSession { .. } => "startSession",
            Self::StopSession => "stopSession",
            Self::SubmitPrompt { .. } => "submitPrompt",
        }
    }
}

/// Result of a `submitPrompt` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<SubmitMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitOutcome {
    pub fn submitted(method: SubmitMethod) -> Self {
        Self {
            success: true,
            method: Some(method),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            method: None,
            error: Some(error.into()),
        }
    }
}

/// Agent → controller reply to an [`AgentRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AgentReply {
    Ready,
    Accepted,
    Submit(SubmitOutcome),
}

/// Agent → controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum ControllerRequest {
    TurnCompleted(CompletedTurn),
    PromptObservedManually(ObservedPrompt),
}

/// Controller → agent reply to a [`ControllerRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ControllerReply {
    Accepted,
    Duplicate,
}
