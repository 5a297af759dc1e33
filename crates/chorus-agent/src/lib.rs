//! Session agent — runs where a chat page lives.
//!
//! Watches the page through the [`Document`]/[`Page`] abstraction, extracts
//! the conversation with an ordered list of strategies, decides when a reply
//! has finished, and reports exactly one completed turn per exchange.
//! [`run_agent`] connects a page to the controller's relay.
//!
//! The in-memory page used by the tests is available to other crates through
//! the `testing` feature.

pub mod agent;
pub mod client;
pub mod document;
pub mod inject;
pub mod machine;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod monitor;
pub mod oracle;
pub mod strategy;

pub use agent::SessionAgent;
pub use client::{run_agent, AgentConnection, ControllerLink};
pub use document::{Document, Element, MutationBatch, MutationStream, NodeId, Page};
pub use inject::inject_prompt;
pub use machine::{Phase, Step, TurnMachine, TurnState};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryPage, NodeSpec, PageAction};
pub use monitor::{Monitor, MonitorConfig, PromptLedger, TurnSink};
pub use oracle::{assess, Completion};
pub use strategy::{
    AdapterStrategy, AlternationStrategy, ClassHintStrategy, ExtractionStrategy, Extractor,
    RoleAttributeStrategy,
};
