//! Chorus Protocol — wire types shared by the controller and the session agents.
//!
//! Holds the session/turn data model, the request/reply verbs and the socket
//! frames that carry them, site adapter configuration, and the prompt
//! transform table.

pub mod adapter;
pub mod frames;
pub mod messages;
pub mod transform;
pub mod types;

pub use adapter::{AdapterSelectors, AdapterTable, DetectionSignals, SiteAdapter, GENERIC_ADAPTER};
pub use frames::{FromAgent, FromShell, ShellCommand, ToAgent, ToShell};
pub use messages::{AgentReply, AgentRequest, ControllerReply, ControllerRequest, SubmitOutcome};
pub use transform::{TransformFn, TransformTable};
pub use types::*;
