//! Prompt injection — type into the site's input and submit it.

use chorus_protocol::{SiteAdapter, SubmitMethod, SubmitOutcome};
use tracing::debug;

use crate::document::Page;

const FALLBACK_INPUT: &str = "textarea";

/// Write `prompt` into the adapter's input and submit it. Clicks the send
/// control when one is usable, otherwise presses Enter in the input.
pub fn inject_prompt(page: &dyn Page, adapter: &SiteAdapter, prompt: &str) -> SubmitOutcome {
    let input = adapter
        .selectors
        .input
        .as_deref()
        .unwrap_or(FALLBACK_INPUT);

    match page.set_input(input, prompt) {
        Ok(true) => {}
        Ok(false) => return SubmitOutcome::failed(format!("prompt input '{}' not found", input)),
        Err(e) => return SubmitOutcome::failed(e.to_string()),
    }

    if let Some(button) = adapter.selectors.submit_button.as_deref() {
        match page.click(button) {
            Ok(true) => return SubmitOutcome::submitted(SubmitMethod::Control),
            Ok(false) => debug!(adapter = %adapter.name, "send control unavailable, using Enter"),
            Err(e) => debug!(adapter = %adapter.name, "send control unreadable: {}", e),
        }
    }

    match page.press_enter(input) {
        Ok(()) => SubmitOutcome::submitted(SubmitMethod::KeyPress),
        Err(e) => SubmitOutcome::failed(e.to_string()),
    }
}
