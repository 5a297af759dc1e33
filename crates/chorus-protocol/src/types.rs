//! Core data model shared by the controller and the session agents.

use serde::{Deserialize, Serialize};

/// One orchestrated chat-page instance.
///
/// `id` names the hosting window/tab; `agent_handle` names the page context
/// the agent runs in. The registry holds at most one session per handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "agentHandle")]
    pub agent_handle: String,
    #[serde(rename = "targetUrl")]
    pub target_url: String,
    #[serde(rename = "adapterKey")]
    pub adapter_key: String,
    pub index: usize,
}

/// Position and size of one session window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// Author of an extracted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message pulled out of the page, in conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMessage {
    pub role: Role,
    pub content: String,
}

impl ExtractedMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-session prompt transform selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformSpec {
    pub category: String,
    pub method: String,
}

impl TransformSpec {
    pub fn new(category: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            method: method.into(),
        }
    }

    /// The no-op transform.
    pub fn identity() -> Self {
        Self::new("none", "none")
    }

    pub fn is_identity(&self) -> bool {
        self.category == "none"
    }
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self::identity()
    }
}

/// One finished (prompt, response) exchange reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTurn {
    #[serde(rename = "sessionIndex")]
    pub session_index: usize,
    pub prompt: String,
    pub response: String,
    /// RFC 3339 emission time.
    pub timestamp: String,
}

impl CompletedTurn {
    pub fn now(session_index: usize, prompt: String, response: String) -> Self {
        Self {
            session_index,
            prompt,
            response,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Where an observed prompt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOrigin {
    /// Typed into the page by a person rather than dispatched.
    Manual,
    Dispatched,
}

/// A prompt the agent saw in the page that it did not inject itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPrompt {
    #[serde(rename = "sessionIndex")]
    pub session_index: usize,
    pub prompt: String,
    pub timestamp: String,
    pub origin: PromptOrigin,
}

impl ObservedPrompt {
    pub fn manual(session_index: usize, prompt: String) -> Self {
        Self {
            session_index,
            prompt,
            timestamp: chrono::Utc::now().to_rfc3339(),
            origin: PromptOrigin::Manual,
        }
    }
}

/// How an agent got the chat page to send the injected prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmitMethod {
    /// Clicked the page's send control.
    Control,
    /// No usable control; synthesized an Enter key-press.
    KeyPress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_wire_names() {
        let session = Session {
            id: "w1".into(),
            agent_handle: "tab-9".into(),
            target_url: "https://chat.example.com".into(),
            adapter_key: "chatgpt".into(),
            index: 0,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["agentHandle"], "tab-9");
        assert_eq!(json["targetUrl"], "https://chat.example.com");
        assert_eq!(json["adapterKey"], "chatgpt");
    }

    #[test]
    fn test_identity_transform() {
        assert!(TransformSpec::identity().is_identity());
        assert!(TransformSpec::new("none", "rot13").is_identity());
        assert!(!TransformSpec::new("ciphers", "rot13").is_identity());
        assert_eq!(TransformSpec::default(), TransformSpec::identity());
    }

    #[test]
    fn test_submit_method_names() {
        assert_eq!(
            serde_json::to_string(&SubmitMethod::KeyPress).unwrap(),
            "\"keyPress\""
        );
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
