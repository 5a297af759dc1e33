//! WebSocket frames carried by the relay.
//!
//! The shell and every agent talk to the controller over their own socket.
//! Requests carry a correlation `id` that the answer echoes back.

use serde::{Deserialize, Serialize};

use crate::adapter::SiteAdapter;
use crate::messages::{AgentReply, AgentRequest, ControllerReply, ControllerRequest};
use crate::types::WindowBounds;

/// Commands the controller sends to the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ShellCommand {
    CreateSession {
        url: String,
        bounds: WindowBounds,
    },
    SessionExists {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    CloseSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    InstallAgent {
        #[serde(rename = "agentHandle")]
        agent_handle: String,
        adapter: SiteAdapter,
    },
}

/// Controller → shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToShell {
    Request { id: String, command: ShellCommand },
}

/// Shell → controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromShell {
    Reply {
        id: String,
        ok: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    /// The user closed a session window directly.
    SessionClosed {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Controller → agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToAgent {
    Request { id: String, request: AgentRequest },
    /// Answer to one of the agent's reports.
    Ack { id: String, reply: ControllerReply },
}

/// Agent → controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromAgent {
    Reply { id: String, reply: AgentReply },
    Report { id: String, request: ControllerRequest },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompletedTurn;
    use serde_json::json;

    #[test]
    fn test_shell_frames() {
        let frame = ToShell::Request {
            id: "r1".into(),
            command: ShellCommand::CloseSession {
                session_id: "w1".into(),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["command"]["command"], "closeSession");
        assert_eq!(value["command"]["sessionId"], "w1");

        let closed: FromShell =
            serde_json::from_str(r#"{"type":"sessionClosed","sessionId":"w2"}"#).unwrap();
        assert!(matches!(closed, FromShell::SessionClosed { session_id } if session_id == "w2"));

        let reply: FromShell =
            serde_json::from_str(r#"{"type":"reply","id":"r1","ok":true,"result":true}"#).unwrap();
        match reply {
            FromShell::Reply { id, ok, result, error } => {
                assert_eq!(id, "r1");
                assert!(ok);
                assert_eq!(result, json!(true));
                assert!(error.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_agent_report_frame() {
        let report: FromAgent = serde_json::from_value(json!({
            "type": "report",
            "id": "a1",
            "request": {
                "verb": "turnCompleted",
                "sessionIndex": 0,
                "prompt": "q",
                "response": "a",
                "timestamp": "2026-01-01T00:00:00Z"
            }
        }))
        .unwrap();
        assert!(matches!(
            report,
            FromAgent::Report { request: ControllerRequest::TurnCompleted(CompletedTurn { .. }), .. }
        ));

        let ack = serde_json::to_value(ToAgent::Ack {
            id: "a1".into(),
            reply: ControllerReply::Duplicate,
        })
        .unwrap();
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["reply"]["status"], "duplicate");
    }
}
