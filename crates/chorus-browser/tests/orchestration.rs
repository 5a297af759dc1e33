//! Registry, handshake and dispatch against an in-process fake host.
//!
//! Timers run on tokio's paused clock, so probe timeouts and settle delays
//! complete instantly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorus_browser::{
    AgentChannel, Controller, CreatedSession, Liveness, SessionHost, SessionStore, WindowBounds,
};
use chorus_core::{ChorusConfig, Error, InvalidUrlReason, Result};
use chorus_protocol::{AgentReply, AgentRequest, Session, SubmitMethod, SubmitOutcome, TransformSpec};
use parking_lot::Mutex;

#[derive(Default)]
struct FakeAgents {
    responsive: Mutex<HashSet<String>>,
    received: Mutex<Vec<(String, AgentRequest)>>,
}

impl FakeAgents {
    fn answer(&self, handle: &str) {
        self.responsive.lock().insert(handle.to_string());
    }

    fn silence(&self, handle: &str) {
        self.responsive.lock().remove(handle);
    }

    fn prompts(&self) -> Vec<(String, String)> {
        self.received
            .lock()
            .iter()
            .filter_map(|(handle, req)| match req {
                AgentRequest::SubmitPrompt { prompt, .. } => Some((handle.clone(), prompt.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, verb: &str) -> usize {
        self.received.lock().iter().filter(|(_, r)| r.verb() == verb).count()
    }
}

#[async_trait]
impl AgentChannel for FakeAgents {
    async fn send(&self, handle: &str, request: AgentRequest, _timeout: Duration) -> Result<AgentReply> {
        self.received.lock().push((handle.to_string(), request.clone()));
        if !self.responsive.lock().contains(handle) {
            // Never answers; the caller's timeout has to end this
            std::future::pending::<()>().await;
        }
        Ok(match request {
            AgentRequest::Probe => AgentReply::Ready,
            AgentRequest::StartSession { .. } | AgentRequest::StopSession => AgentReply::Accepted,
            AgentRequest::SubmitPrompt { .. } => {
                AgentReply::Submit(SubmitOutcome::submitted(SubmitMethod::Control))
            }
        })
    }
}

#[derive(Default)]
struct FakeHost {
    agents: Arc<FakeAgents>,
    created: AtomicUsize,
    failing_slots: HashSet<usize>,
    /// Agents present as soon as the page loads.
    preloaded: bool,
    install_fails: bool,
    open: Mutex<HashSet<String>>,
    installs: Mutex<Vec<String>>,
    /// Runs before each creation with its sequence number.
    on_create: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

#[async_trait]
impl SessionHost for FakeHost {
    async fn create_session(&self, _url: &str, _bounds: WindowBounds) -> Result<CreatedSession> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_create.lock().as_ref() {
            hook(n);
        }
        if self.failing_slots.contains(&(n % 10)) {
            return Err(Error::Transport("window refused".into()));
        }
        let created = CreatedSession {
            id: format!("win-{}", n),
            agent_handle: format!("tab-{}", n),
        };
        self.open.lock().insert(created.id.clone());
        if self.preloaded {
            self.agents.answer(&created.agent_handle);
        }
        Ok(created)
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.open.lock().contains(session_id))
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.open.lock().remove(session_id);
        Ok(())
    }

    async fn install_agent(&self, handle: &str, _adapter_key: &str) -> Result<()> {
        self.installs.lock().push(handle.to_string());
        if self.install_fails {
            return Err(Error::InjectionFailed("content script blocked".into()));
        }
        self.agents.answer(handle);
        Ok(())
    }
}

struct Fixture {
    controller: Controller,
    host: Arc<FakeHost>,
    _dir: tempfile::TempDir,
}

fn fixture(host: FakeHost) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = ChorusConfig::from_vars(dir.path(), |_| None).unwrap();
    let host = Arc::new(host);
    let store = Arc::new(SessionStore::open(&config.data_paths.sessions_file));
    let controller = Controller::new(&config, store, host.clone(), host.agents.clone(), None);
    Fixture {
        controller,
        host,
        _dir: dir,
    }
}

fn preloaded() -> FakeHost {
    FakeHost {
        preloaded: true,
        ..Default::default()
    }
}

// ---------------------------------------------------------------
// Registry
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_open_batch_records_created_sessions() {
    let f = fixture(preloaded());
    let report = f
        .controller
        .registry()
        .open_batch(3, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();

    assert_eq!(report.created.len(), 3);
    assert!(!report.is_partial());
    let sessions = f.controller.registry().list();
    let indices: Vec<usize> = sessions.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let handles: HashSet<&str> = sessions.iter().map(|s| s.agent_handle.as_str()).collect();
    assert_eq!(handles.len(), 3);
    assert!(sessions.iter().all(|s| s.adapter_key == "chatgpt"));
}

#[tokio::test(start_paused = true)]
async fn test_open_batch_tolerates_partial_failure() {
    let f = fixture(FakeHost {
        failing_slots: [1].into_iter().collect(),
        ..preloaded()
    });
    let report = f
        .controller
        .registry()
        .open_batch(3, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();

    assert_eq!(report.created.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].slot, 1);
    assert_eq!(f.controller.store().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_batch_fails_when_nothing_created() {
    let f = fixture(FakeHost {
        failing_slots: (0..10).collect(),
        ..Default::default()
    });
    let err = f
        .controller
        .registry()
        .open_batch(2, "https://chat.example.com", "chatgpt")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSessionsCreated { requested: 2 }));
    assert!(f.controller.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_url_fails_before_host_is_touched() {
    let f = fixture(preloaded());
    let err = f
        .controller
        .registry()
        .open_batch(2, "file:///etc/hosts", "chatgpt")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidUrl(InvalidUrlReason::DisallowedProtocol(_))
    ));
    assert_eq!(f.host.created.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_batch_replaces_old_one() {
    let f = fixture(preloaded());
    let registry = f.controller.registry();
    registry.open_batch(2, "https://chat.example.com", "chatgpt").await.unwrap();
    registry.open_batch(1, "https://chat.example.com", "claude").await.unwrap();

    let sessions = registry.list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].adapter_key, "claude");
    // The first batch's windows were closed on the host
    assert_eq!(f.host.open.lock().len(), 1);

    assert_eq!(registry.close_all().await, 1);
    assert!(f.host.open.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_prunes_sessions_host_lost() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChorusConfig::from_vars(dir.path(), |_| None).unwrap();
    let session = |n: usize| Session {
        id: format!("win-{}", n),
        agent_handle: format!("tab-{}", n),
        target_url: "https://chat.example.com/".into(),
        adapter_key: "chatgpt".into(),
        index: n,
    };
    SessionStore::open(&config.data_paths.sessions_file)
        .replace_all(vec![session(0), session(1), session(2)]);

    let host = Arc::new(FakeHost::default());
    host.open.lock().extend(["win-0".to_string(), "win-2".to_string()]);
    let store = Arc::new(SessionStore::open(&config.data_paths.sessions_file));
    let controller = Controller::new(&config, store, host.clone(), host.agents.clone(), None);

    let report = controller.registry().reconcile_on_startup().await;
    assert_eq!(report.kept, 2);
    assert_eq!(report.pruned, vec!["win-1".to_string()]);

    // Pruning reached the disk as well
    let reloaded = SessionStore::open(&config.data_paths.sessions_file);
    assert!(!reloaded.contains("win-1"));
    assert_eq!(reloaded.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_external_close_prunes_session_and_agent_mark() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(2, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    f.controller.dispatcher().dispatch("hi", &HashMap::new()).await.unwrap();
    assert!(f.controller.store().is_injected("tab-0"));

    assert_eq!(f.controller.registry().get("win-0").unwrap().index, 0);
    let removed = f.controller.on_session_closed("win-0").unwrap();
    assert_eq!(removed.agent_handle, "tab-0");
    assert!(!f.controller.store().is_injected("tab-0"));
    assert!(f.controller.on_session_closed("win-0").is_none());
    assert!(matches!(
        f.controller.registry().get("win-0"),
        Err(Error::NotFound(_))
    ));

    let result = f.controller.dispatcher().dispatch("again", &HashMap::new()).await.unwrap();
    assert_eq!(result.total_count, 1);
    assert_eq!(result.per_session[0].session_id, "win-1");
}

#[tokio::test(start_paused = true)]
async fn test_close_during_batch_is_not_undone() {
    let f = fixture(preloaded());
    let store = f.controller.store().clone();
    let seen_on_close = Arc::new(Mutex::new(None));
    let seen = seen_on_close.clone();
    *f.host.on_create.lock() = Some(Box::new(move |n| {
        // The user closes the first window while the second one opens
        if n == 1 {
            *seen.lock() = Some(store.remove("win-0").is_some());
        }
    }));

    let report = f
        .controller
        .registry()
        .open_batch(3, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();

    assert_eq!(*seen_on_close.lock(), Some(true));
    let ids: Vec<String> = f.controller.registry().list().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["win-1".to_string(), "win-2".to_string()]);
    assert_eq!(report.created.len(), 2);
    assert!(report.created.iter().all(|s| s.id != "win-0"));
}

#[tokio::test(start_paused = true)]
async fn test_batch_is_on_disk_while_it_opens() {
    let dir = tempfile::tempdir().unwrap();
    let config = ChorusConfig::from_vars(dir.path(), |_| None).unwrap();
    let path = config.data_paths.sessions_file.clone();
    let host = Arc::new(preloaded());
    let persisted_before = Arc::new(Mutex::new(Vec::new()));
    let record = persisted_before.clone();
    *host.on_create.lock() = Some(Box::new(move |_| {
        record.lock().push(SessionStore::open(&path).len());
    }));
    let store = Arc::new(SessionStore::open(&config.data_paths.sessions_file));
    let controller = Controller::new(&config, store, host.clone(), host.agents.clone(), None);

    controller
        .registry()
        .open_batch(3, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    // Every earlier window was already persisted when the next was requested
    assert_eq!(*persisted_before.lock(), vec![0, 1, 2]);
}

// ---------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_ensure_live_twice_never_reinstalls() {
    let f = fixture(FakeHost::default());
    f.controller
        .registry()
        .open_batch(1, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    let session = f.controller.registry().list().remove(0);
    let handshake = f.controller.handshake();

    let timeout = Duration::from_millis(1500);
    assert_eq!(handshake.ensure_live(&session, timeout).await, Liveness::LiveAfterInstall);
    assert_eq!(handshake.ensure_live(&session, timeout).await, Liveness::LiveWithoutAction);
    assert_eq!(f.host.installs.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_statically_loaded_agent_is_marked() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(1, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    let session = f.controller.registry().list().remove(0);

    let liveness = f
        .controller
        .handshake()
        .ensure_live(&session, Duration::from_millis(1500))
        .await;
    assert_eq!(liveness, Liveness::LiveWithoutAction);
    assert!(f.controller.store().is_injected(&session.agent_handle));
    assert!(f.host.installs.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_installed_agent_fails_without_reinstall() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(1, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    let session = f.controller.registry().list().remove(0);
    let handshake = f.controller.handshake();
    let timeout = Duration::from_millis(1500);

    handshake.ensure_live(&session, timeout).await;
    f.host.agents.silence(&session.agent_handle);

    assert_eq!(handshake.ensure_live(&session, timeout).await, Liveness::Failed);
    assert!(f.host.installs.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_handshakes_install_once() {
    let f = fixture(FakeHost::default());
    f.controller
        .registry()
        .open_batch(1, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    let session = f.controller.registry().list().remove(0);
    let handshake = f.controller.handshake();
    let timeout = Duration::from_millis(1500);

    let (a, b) = tokio::join!(
        handshake.ensure_live(&session, timeout),
        handshake.ensure_live(&session, timeout)
    );
    assert!(a.is_live() && b.is_live());
    assert_eq!(f.host.installs.lock().len(), 1);
}

// ---------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_dispatch_applies_transform_per_session() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(2, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();

    let transforms: HashMap<usize, TransformSpec> = [
        (0, TransformSpec::new("ciphers", "rot13")),
        (1, TransformSpec::new("none", "none")),
    ]
    .into_iter()
    .collect();
    let result = f.controller.dispatcher().dispatch("hello", &transforms).await.unwrap();

    assert!(result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.total_count, 2);
    assert_eq!(
        f.host.agents.prompts(),
        vec![
            ("tab-0".to_string(), "uryyb".to_string()),
            ("tab-1".to_string(), "hello".to_string())
        ]
    );
    assert_eq!(result.per_session[0].method, Some(SubmitMethod::Control));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_installs_missing_agent_in_same_call() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(2, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    // Second page loaded without its agent
    f.host.agents.silence("tab-1");

    let result = f.controller.dispatcher().dispatch("hello", &HashMap::new()).await.unwrap();
    assert_eq!(result.success_count, 2);
    assert_eq!(result.per_session[0].liveness, Some(Liveness::LiveWithoutAction));
    assert_eq!(result.per_session[1].liveness, Some(Liveness::LiveAfterInstall));
    assert_eq!(*f.host.installs.lock(), vec!["tab-1".to_string()]);
    assert_eq!(f.host.agents.prompts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_continues_past_unreachable_session() {
    let f = fixture(FakeHost {
        install_fails: true,
        ..preloaded()
    });
    f.controller
        .registry()
        .open_batch(3, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();
    f.host.agents.silence("tab-0");

    let result = f.controller.dispatcher().dispatch("hello", &HashMap::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.total_count, 3);
    let failed = &result.per_session[0];
    assert!(!failed.success);
    assert_eq!(failed.liveness, Some(Liveness::Failed));
    assert!(failed.error.as_deref().unwrap().contains("unreachable"));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_without_sessions_fails() {
    let f = fixture(preloaded());
    let err = f
        .controller
        .dispatcher()
        .dispatch("hello", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSessionsOpen));
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_start_and_stop_fan_out() {
    let f = fixture(preloaded());
    f.controller
        .registry()
        .open_batch(2, "https://chat.example.com", "chatgpt")
        .await
        .unwrap();

    let started = f.controller.dispatcher().start_monitoring().await.unwrap();
    assert_eq!(started.success_count, 2);
    assert_eq!(f.host.agents.count("startSession"), 2);

    f.host.agents.silence("tab-1");
    let stopped = f.controller.dispatcher().stop_monitoring().await.unwrap();
    assert_eq!(stopped.success_count, 1);
    assert_eq!(stopped.total_count, 2);
    assert!(stopped.per_session[1].error.as_deref().unwrap().contains("Timed out"));
}
