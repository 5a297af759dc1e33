//! Receives completed turns from the agents and hands them to the log sink.
//!
//! Accepted turns also stay in a per-session backlog until drained, which is
//! what duplicate detection checks against.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorus_core::Result;
use chorus_protocol::{CompletedTurn, ControllerReply, ObservedPrompt};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// External destination for completed turns.
pub trait LogSink: Send + Sync {
    fn append(&self, turn: &CompletedTurn) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonlSink {
    fn append(&self, turn: &CompletedTurn) -> Result<()> {
        let mut line = serde_json::to_string(turn)?;
        line.push('\n');
        let _guard = self.write.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Everything accepted since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    pub turns: Vec<CompletedTurn>,
    pub prompts: Vec<ObservedPrompt>,
}

#[derive(Default)]
struct Pending {
    turns: BTreeMap<usize, Vec<CompletedTurn>>,
    prompts: BTreeMap<usize, Vec<ObservedPrompt>>,
}

pub struct Aggregator {
    pending: Mutex<Pending>,
    sink: Option<Arc<dyn LogSink>>,
}

impl Aggregator {
    pub fn new(sink: Option<Arc<dyn LogSink>>) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            sink,
        }
    }

    /// Accept a completed turn unless the same (session, prompt, response)
    /// is already pending. Sink failures are logged, never returned.
    pub fn report(&self, turn: CompletedTurn) -> ControllerReply {
        {
            let mut pending = self.pending.lock();
            let session = pending.turns.entry(turn.session_index).or_default();
            if session
                .iter()
                .any(|t| t.prompt == turn.prompt && t.response == turn.response)
            {
                debug!(session = turn.session_index, "duplicate turn rejected");
                return ControllerReply::Duplicate;
            }
            session.push(turn.clone());
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&turn) {
                warn!(session = turn.session_index, "Failed to log turn: {}", e);
            }
        }
        info!(
            session = turn.session_index,
            response_chars = turn.response.chars().count(),
            "Turn completed"
        );
        ControllerReply::Accepted
    }

    /// Record a prompt the user typed into a session directly.
    pub fn observe_prompt(&self, prompt: ObservedPrompt) -> ControllerReply {
        let mut pending = self.pending.lock();
        let session = pending.prompts.entry(prompt.session_index).or_default();
        if session.iter().any(|p| p.prompt == prompt.prompt) {
            return ControllerReply::Duplicate;
        }
        info!(session = prompt.session_index, "Manual prompt observed");
        session.push(prompt);
        ControllerReply::Accepted
    }

    /// Pending turns, ordered by session index then arrival.
    pub fn list(&self) -> Vec<CompletedTurn> {
        self.pending.lock().turns.values().flatten().cloned().collect()
    }

    pub fn observed_prompts(&self) -> Vec<ObservedPrompt> {
        self.pending.lock().prompts.values().flatten().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().turns.values().map(Vec::len).sum()
    }

    /// Take everything pending and start over.
    pub fn drain(&self) -> Backlog {
        let pending = std::mem::take(&mut *self.pending.lock());
        Backlog {
            turns: pending.turns.into_values().flatten().collect(),
            prompts: pending.prompts.into_values().flatten().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::Error;

    fn turn(index: usize, prompt: &str, response: &str) -> CompletedTurn {
        CompletedTurn::now(index, prompt.into(), response.into())
    }

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn append(&self, _turn: &CompletedTurn) -> Result<()> {
            Err(Error::Internal("disk full".into()))
        }
    }

    #[test]
    fn test_duplicate_turns_rejected_per_session() {
        let agg = Aggregator::new(None);
        assert_eq!(agg.report(turn(0, "q", "a")), ControllerReply::Accepted);
        assert_eq!(agg.report(turn(0, "q", "a")), ControllerReply::Duplicate);
        // Same pair on another session is its own turn
        assert_eq!(agg.report(turn(1, "q", "a")), ControllerReply::Accepted);
        assert_eq!(agg.report(turn(0, "q", "a2")), ControllerReply::Accepted);
        assert_eq!(agg.pending_count(), 3);
    }

    #[test]
    fn test_drain_empties_backlog() {
        let agg = Aggregator::new(None);
        agg.report(turn(1, "q", "a"));
        agg.report(turn(0, "q", "a"));
        agg.observe_prompt(ObservedPrompt::manual(0, "typed".into()));

        let backlog = agg.drain();
        assert_eq!(backlog.turns.len(), 2);
        assert_eq!(backlog.turns[0].session_index, 0);
        assert_eq!(backlog.prompts.len(), 1);
        assert!(agg.list().is_empty());

        // After a drain the same turn is new again
        assert_eq!(agg.report(turn(0, "q", "a")), ControllerReply::Accepted);
    }

    #[test]
    fn test_manual_prompts_deduplicated() {
        let agg = Aggregator::new(None);
        let p = ObservedPrompt::manual(2, "hello".into());
        assert_eq!(agg.observe_prompt(p.clone()), ControllerReply::Accepted);
        assert_eq!(agg.observe_prompt(p), ControllerReply::Duplicate);
        assert_eq!(agg.observed_prompts().len(), 1);
    }

    #[test]
    fn test_sink_failure_still_accepts() {
        let agg = Aggregator::new(Some(Arc::new(BrokenSink)));
        assert_eq!(agg.report(turn(0, "q", "a")), ControllerReply::Accepted);
        assert_eq!(agg.list().len(), 1);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(&dir.path().join("turns.jsonl"));
        sink.append(&turn(0, "q1", "a1")).unwrap();
        sink.append(&turn(1, "q2", "a2")).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<CompletedTurn> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].prompt, "q2");
    }
}
