//! Session registry — the authoritative list of open sessions.
//!
//! [`SessionStore`] owns the session list and the injected-agent set behind a
//! single lock; every mutation is one critical section and is written to
//! `sessions.json` before the lock is released. [`SessionRegistry`] layers the
//! host-facing batch operations on top and serializes them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorus_core::{Error, Result};
use chorus_protocol::Session;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::host::SessionHost;
use crate::layout::{tile, ScreenArea};
use crate::url_policy::validate_target_url;

#[derive(Default)]
struct StoreInner {
    sessions: Vec<Session>,
    /// Agent handles known to host a working agent.
    injected: HashSet<String>,
}

/// Session list plus injected set, mirrored to disk on every change.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Load the persisted session list, or start empty.
    ///
    /// The injected set is never persisted: after a restart every agent has
    /// to prove itself through a probe again.
    pub fn open(path: &Path) -> Self {
        let sessions: Vec<Session> = match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        info!("SessionStore loaded: {} persisted sessions", sessions.len());
        Self {
            inner: Mutex::new(StoreInner {
                sessions,
                injected: HashSet::new(),
            }),
            path: Some(path.to_path_buf()),
        }
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            path: None,
        }
    }

    pub fn list(&self) -> Vec<Session> {
        self.inner.lock().sessions.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.lock().sessions.iter().any(|s| s.id == session_id)
    }

    /// Append one session and persist it.
    pub fn push(&self, session: Session) {
        let mut inner = self.inner.lock();
        inner.sessions.push(session);
        self.persist(&inner);
    }

    /// Replace the whole list. The injected set is reset with it.
    pub fn replace_all(&self, sessions: Vec<Session>) {
        let mut inner = self.inner.lock();
        inner.sessions = sessions;
        inner.injected.clear();
        self.persist(&inner);
    }

    /// Remove every session and return what was there.
    pub fn clear(&self) -> Vec<Session> {
        let mut inner = self.inner.lock();
        let removed = std::mem::take(&mut inner.sessions);
        inner.injected.clear();
        self.persist(&inner);
        removed
    }

    /// Remove one session together with its injected entry.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let mut inner = self.inner.lock();
        let pos = inner.sessions.iter().position(|s| s.id == session_id)?;
        let removed = inner.sessions.remove(pos);
        inner.injected.remove(&removed.agent_handle);
        self.persist(&inner);
        Some(removed)
    }

    /// Keep only sessions for which `keep` returns true.
    pub fn retain(&self, keep: impl Fn(&Session) -> bool) -> Vec<Session> {
        let mut inner = self.inner.lock();
        let (kept, dropped): (Vec<_>, Vec<_>) =
            std::mem::take(&mut inner.sessions).into_iter().partition(|s| keep(s));
        inner.sessions = kept;
        for session in &dropped {
            inner.injected.remove(&session.agent_handle);
        }
        if !dropped.is_empty() {
            self.persist(&inner);
        }
        dropped
    }

    pub fn is_injected(&self, agent_handle: &str) -> bool {
        self.inner.lock().injected.contains(agent_handle)
    }

    /// Record a working agent. Ignored if no registered session owns the
    /// handle, so a session closed mid-handshake leaves nothing behind.
    pub fn mark_injected(&self, agent_handle: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.sessions.iter().any(|s| s.agent_handle == agent_handle) {
            return false;
        }
        inner.injected.insert(agent_handle.to_string());
        true
    }

    pub fn injected_count(&self) -> usize {
        self.inner.lock().injected.len()
    }

    fn persist(&self, inner: &StoreInner) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string_pretty(&inner.sessions)
            .map_err(Error::from)
            .and_then(|json| std::fs::write(path, json).map_err(Error::from));
        if let Err(e) = result {
            warn!("Failed to persist sessions to {}: {}", path.display(), e);
        }
    }
}

/// A slot of a batch that could not be opened.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationFailure {
    pub slot: usize,
    pub error: String,
}

/// Outcome of [`SessionRegistry::open_batch`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub requested: usize,
    pub created: Vec<Session>,
    pub failures: Vec<CreationFailure>,
}

impl BatchReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Outcome of [`SessionRegistry::reconcile_on_startup`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub kept: usize,
    pub pruned: Vec<String>,
}

/// Batch operations against the host, applied to the [`SessionStore`].
pub struct SessionRegistry {
    store: Arc<SessionStore>,
    host: Arc<dyn SessionHost>,
    screen: ScreenArea,
    blocked_hosts: Vec<String>,
    batch: tokio::sync::Mutex<()>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<SessionStore>,
        host: Arc<dyn SessionHost>,
        screen: ScreenArea,
        blocked_hosts: Vec<String>,
    ) -> Self {
        Self {
            store,
            host,
            screen,
            blocked_hosts,
            batch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn list(&self) -> Vec<Session> {
        self.store.list()
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.store
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
    }

    /// Close any open batch, then open `count` sessions on `url`.
    ///
    /// Only sessions the host actually created are recorded. Fails when the
    /// URL is rejected (before touching the host) or when nothing was created.
    pub async fn open_batch(&self, count: usize, url: &str, adapter_key: &str) -> Result<BatchReport> {
        let target = validate_target_url(url, &self.blocked_hosts)?;
        if count == 0 {
            return Err(Error::NoSessionsCreated { requested: 0 });
        }

        let _batch = self.batch.lock().await;
        self.close_open_sessions().await;

        // Each session is recorded the moment the host creates it, so a close
        // notification or a crash mid-batch sees it
        let mut handles: HashSet<String> = HashSet::with_capacity(count);
        let mut failures = Vec::new();
        for (slot, bounds) in tile(count, self.screen).into_iter().enumerate() {
            match self.host.create_session(target.as_str(), bounds).await {
                Ok(new) if handles.contains(&new.agent_handle) => {
                    warn!(slot, handle = %new.agent_handle, "Host reused an agent handle, closing duplicate");
                    if let Err(e) = self.host.close_session(&new.id).await {
                        debug!("close of duplicate session failed: {}", e);
                    }
                    failures.push(CreationFailure {
                        slot,
                        error: format!("duplicate agent handle {}", new.agent_handle),
                    });
                }
                Ok(new) => {
                    let index = handles.len();
                    handles.insert(new.agent_handle.clone());
                    self.store.push(Session {
                        id: new.id,
                        agent_handle: new.agent_handle,
                        target_url: target.to_string(),
                        adapter_key: adapter_key.to_string(),
                        index,
                    });
                }
                Err(e) => {
                    warn!(slot, "Session creation failed: {}", e);
                    failures.push(CreationFailure {
                        slot,
                        error: e.to_string(),
                    });
                }
            }
        }

        if handles.is_empty() {
            return Err(Error::NoSessionsCreated { requested: count });
        }
        if !failures.is_empty() {
            warn!(
                "Opened {}/{} sessions ({} failed)",
                handles.len(),
                count,
                failures.len()
            );
        } else {
            info!("Opened {} sessions on {}", handles.len(), target);
        }

        // Sessions closed externally while the batch was running are already gone
        let created = self.store.list();
        if created.len() < handles.len() {
            info!(
                "{} sessions of the new batch closed before it finished",
                handles.len() - created.len()
            );
        }
        Ok(BatchReport {
            requested: count,
            created,
            failures,
        })
    }

    /// Close every registered session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let _batch = self.batch.lock().await;
        self.close_open_sessions().await
    }

    async fn close_open_sessions(&self) -> usize {
        // Cleared first so late close notifications from the host find nothing
        let sessions = self.store.clear();
        for session in &sessions {
            if let Err(e) = self.host.close_session(&session.id).await {
                warn!(session = %session.id, "Failed to close session: {}", e);
            }
        }
        if !sessions.is_empty() {
            info!("Closed {} sessions", sessions.len());
        }
        sessions.len()
    }

    /// Drop persisted sessions the host no longer has.
    pub async fn reconcile_on_startup(&self) -> ReconcileReport {
        let _batch = self.batch.lock().await;
        let persisted = self.store.list();

        let mut live = HashSet::new();
        for session in &persisted {
            match self.host.session_exists(&session.id).await {
                Ok(true) => {
                    live.insert(session.id.clone());
                }
                Ok(false) => debug!(session = %session.id, "persisted session is gone"),
                Err(e) => warn!(session = %session.id, "Existence check failed, pruning: {}", e),
            }
        }

        let pruned: Vec<String> = self
            .store
            .retain(|s| live.contains(&s.id))
            .into_iter()
            .map(|s| s.id)
            .collect();
        let report = ReconcileReport {
            kept: self.store.len(),
            pruned,
        };
        info!(
            "Reconciled sessions: {} kept, {} pruned",
            report.kept,
            report.pruned.len()
        );
        report
    }

    /// The host reports that a session was closed outside our control.
    pub fn on_session_closed(&self, session_id: &str) -> Option<Session> {
        let removed = self.store.remove(session_id);
        match &removed {
            Some(s) => info!(session = %s.id, index = s.index, "Session closed externally"),
            None => debug!(session = session_id, "close notification for unknown session"),
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(index: usize) -> Session {
        Session {
            id: format!("win-{}", index),
            agent_handle: format!("tab-{}", index),
            target_url: "https://chat.example.com/".into(),
            adapter_key: "chatgpt".into(),
            index,
        }
    }

    #[test]
    fn test_store_persists_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::open(&path);
        assert!(store.is_empty());
        store.replace_all(vec![session(0), session(1)]);
        assert_eq!(SessionStore::open(&path).len(), 2);

        store.remove("win-0");
        let reloaded = SessionStore::open(&path);
        assert_eq!(reloaded.list(), vec![session(1)]);

        store.clear();
        assert!(SessionStore::open(&path).is_empty());
    }

    #[test]
    fn test_push_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::open(&path);
        store.replace_all(vec![session(0)]);
        store.mark_injected("tab-0");

        store.push(session(1));
        assert!(store.is_injected("tab-0"));
        assert_eq!(SessionStore::open(&path).list(), vec![session(0), session(1)]);
    }

    #[test]
    fn test_injected_set_follows_sessions() {
        let store = SessionStore::in_memory();
        store.replace_all(vec![session(0), session(1)]);
        assert!(store.mark_injected("tab-0"));
        assert!(store.mark_injected("tab-1"));
        assert!(!store.mark_injected("tab-9"));

        store.remove("win-0");
        assert!(!store.is_injected("tab-0"));
        assert!(store.is_injected("tab-1"));

        store.clear();
        assert_eq!(store.injected_count(), 0);
    }

    #[test]
    fn test_retain_prunes_injected_entries() {
        let store = SessionStore::in_memory();
        store.replace_all(vec![session(0), session(1), session(2)]);
        store.mark_injected("tab-1");
        let dropped = store.retain(|s| s.index != 1);
        assert_eq!(dropped, vec![session(1)]);
        assert!(!store.is_injected("tab-1"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SessionStore::open(&path).is_empty());
    }
}
