//! Error types for chorus.

use thiserror::Error;

/// Why a target URL was rejected before any session was created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidUrlReason {
    #[error("protocol '{0}' is not allowed")]
    DisallowedProtocol(String),

    #[error("host '{0}' matches a blocked pattern")]
    BlacklistedHost(String),

    #[error("malformed URL: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("No sessions open")]
    NoSessionsOpen,

    #[error("Session unreachable: {0}")]
    SessionUnreachable(String),

    #[error("Agent injection failed: {0}")]
    InjectionFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(InvalidUrlReason),

    #[error("No sessions created ({requested} requested)")]
    NoSessionsCreated { requested: usize },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Document access error: {0}")]
    Dom(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<InvalidUrlReason> for Error {
    fn from(reason: InvalidUrlReason) -> Self {
        Error::InvalidUrl(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
