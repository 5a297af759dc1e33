//! Chorus Browser — the controller side of multi-session orchestration.
//!
//! Keeps the session registry consistent with the host, makes sure every
//! session has a live agent before talking to it, fans prompts out, and
//! collects the completed turns the agents report back.

pub mod aggregator;
pub mod controller;
pub mod dispatcher;
pub mod handshake;
pub mod host;
pub mod layout;
pub mod registry;
pub mod url_policy;

pub use aggregator::{Aggregator, Backlog, JsonlSink, LogSink};
pub use controller::Controller;
pub use dispatcher::{DispatchResult, Dispatcher, SessionOutcome};
pub use handshake::{Handshake, Liveness};
pub use host::{call_agent, AgentChannel, CreatedSession, SessionHost};
pub use layout::{tile, ScreenArea, WindowBounds};
pub use registry::{BatchReport, CreationFailure, ReconcileReport, SessionRegistry, SessionStore};
pub use url_policy::validate_target_url;
