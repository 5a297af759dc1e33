//! Chorus Core — shared error type, configuration, data paths.

pub mod config;
pub mod error;

pub use config::{ChorusConfig, DataPaths, Timing, DEFAULT_BLOCKED_HOSTS};
pub use error::{Error, InvalidUrlReason, Result};
