//! Completion oracle — decides whether the latest response is still streaming.

use chorus_protocol::DetectionSignals;
use tracing::debug;

use crate::document::Document;

/// Verdict on the most recent assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Incomplete,
    /// No signal either way; the quiet-period timer decides.
    Unknown,
}

fn present(doc: &dyn Document, selector: &str) -> bool {
    match doc.exists(selector) {
        Ok(found) => found,
        Err(e) => {
            debug!(selector, "completion signal unreadable: {}", e);
            false
        }
    }
}

/// Evaluate the adapter's signals in priority order. The first signal found
/// decides, so a visible stop button beats a visible regenerate button.
pub fn assess(doc: &dyn Document, signals: &DetectionSignals) -> Completion {
    if let Some(stop) = &signals.stop_button {
        if present(doc, stop) {
            return Completion::Incomplete;
        }
    }
    if let Some(regenerate) = &signals.regenerate_button {
        if present(doc, regenerate) {
            return Completion::Complete;
        }
    }
    if signals
        .streaming_classes
        .iter()
        .any(|class| present(doc, &format!(".{}", class)))
    {
        return Completion::Incomplete;
    }
    if signals
        .completion_buttons
        .iter()
        .any(|selector| present(doc, selector))
    {
        return Completion::Complete;
    }
    Completion::Unknown
}
