//! Per-session turn state machine.
//!
//! Pure: it owns the [`TurnState`] and tells its driver what to do next
//! (arm or cancel the quiet-period timer, forward a turn). The driver owns
//! the clock. Phases run `Idle → PromptSeen → Streaming → Complete → Idle`.

use chorus_protocol::{CompletedTurn, ExtractedMessage, Role};

use crate::oracle::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PromptSeen,
    Streaming,
    Complete,
}

/// Turn bookkeeping. Mutated only by its own session's machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnState {
    pub last_prompt: Option<String>,
    pub last_response: Option<String>,
    pub pending_response: Option<String>,
    /// Set from emission until the forward resolves and the cool-down ends.
    pub is_logging_response: bool,
}

/// What the driver should do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing changed that matters.
    Unchanged,
    /// A new prompt was adopted; any pending quiet-period timer is void.
    PromptRecorded(String),
    /// The response changed and is not known to be finished: (re)start the
    /// quiet-period timer.
    ArmQuietPeriod,
    /// Forward this turn, then start the cool-down.
    Emit(CompletedTurn),
    /// A response finished but no prompt is known; dropped silently.
    Discarded,
}

pub struct TurnMachine {
    session_index: usize,
    phase: Phase,
    state: TurnState,
}

impl TurnMachine {
    pub fn new(session_index: usize) -> Self {
        Self {
            session_index,
            phase: Phase::Idle,
            state: TurnState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Adopt what is already on the page without treating it as new.
    ///
    /// Called once when monitoring starts so a restored conversation is not
    /// re-reported.
    pub fn prime(&mut self, messages: &[ExtractedMessage]) {
        self.state.last_prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());
        self.state.last_response = match messages.last() {
            Some(m) if m.role == Role::Assistant => Some(m.content.clone()),
            _ => None,
        };
    }

    /// React to the most recent message of a fresh extraction pass.
    ///
    /// `completion` is only consulted when the response actually changed.
    pub fn observe(
        &mut self,
        latest: &ExtractedMessage,
        completion: impl FnOnce() -> Completion,
    ) -> Step {
        match latest.role {
            Role::User => self.observe_prompt(&latest.content),
            Role::Assistant => self.observe_response(&latest.content, completion),
        }
    }

    fn observe_prompt(&mut self, content: &str) -> Step {
        if self.state.last_prompt.as_deref() == Some(content) {
            return Step::Unchanged;
        }
        self.state.last_prompt = Some(content.to_string());
        self.state.last_response = None;
        self.state.pending_response = None;
        self.phase = Phase::PromptSeen;
        Step::PromptRecorded(content.to_string())
    }

    fn observe_response(
        &mut self,
        content: &str,
        completion: impl FnOnce() -> Completion,
    ) -> Step {
        if self.state.is_logging_response
            || self.state.last_response.as_deref() == Some(content)
            || self.state.pending_response.as_deref() == Some(content)
        {
            return Step::Unchanged;
        }
        self.state.pending_response = Some(content.to_string());
        self.phase = Phase::Streaming;

        match completion() {
            Completion::Complete => self.emit(),
            Completion::Incomplete | Completion::Unknown => Step::ArmQuietPeriod,
        }
    }

    /// The quiet period elapsed with no further change.
    pub fn quiet_period_elapsed(&mut self) -> Step {
        if self.state.is_logging_response || self.state.pending_response.is_none() {
            return Step::Unchanged;
        }
        self.emit()
    }

    fn emit(&mut self) -> Step {
        let Some(response) = self.state.pending_response.take() else {
            return Step::Unchanged;
        };
        self.state.last_response = Some(response.clone());

        let Some(prompt) = self.state.last_prompt.clone() else {
            self.phase = Phase::Idle;
            return Step::Discarded;
        };

        self.phase = Phase::Complete;
        self.state.is_logging_response = true;
        Step::Emit(CompletedTurn::now(self.session_index, prompt, response))
    }

    /// The forward resolved and the cool-down ran out.
    pub fn release(&mut self) {
        self.state.is_logging_response = false;
        if self.phase == Phase::Complete {
            self.phase = Phase::Idle;
        }
    }
}
