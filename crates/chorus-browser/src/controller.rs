//! Controller — wires the registry, handshake, dispatcher and aggregator
//! around one shared [`SessionStore`].

use std::sync::Arc;

use chorus_core::ChorusConfig;
use chorus_protocol::{Session, TransformTable};
use tracing::info;

use crate::aggregator::{Aggregator, JsonlSink, LogSink};
use crate::dispatcher::Dispatcher;
use crate::handshake::Handshake;
use crate::host::{AgentChannel, SessionHost};
use crate::layout::ScreenArea;
use crate::registry::{SessionRegistry, SessionStore};

pub struct Controller {
    store: Arc<SessionStore>,
    registry: SessionRegistry,
    handshake: Arc<Handshake>,
    dispatcher: Dispatcher,
    aggregator: Aggregator,
}

impl Controller {
    pub fn new(
        config: &ChorusConfig,
        store: Arc<SessionStore>,
        host: Arc<dyn SessionHost>,
        agents: Arc<dyn AgentChannel>,
        sink: Option<Arc<dyn LogSink>>,
    ) -> Self {
        let handshake = Arc::new(Handshake::new(
            store.clone(),
            host.clone(),
            agents.clone(),
            config.timing.install_settle(),
        ));
        let registry = SessionRegistry::new(
            store.clone(),
            host,
            ScreenArea::default(),
            config.blocked_hosts.clone(),
        );
        let dispatcher = Dispatcher::new(
            store.clone(),
            handshake.clone(),
            agents,
            TransformTable::builtin(),
            config.timing.clone(),
        );
        Self {
            store,
            registry,
            handshake,
            dispatcher,
            aggregator: Aggregator::new(sink),
        }
    }

    /// Controller persisting to the configured data directory.
    pub fn open(
        config: &ChorusConfig,
        host: Arc<dyn SessionHost>,
        agents: Arc<dyn AgentChannel>,
    ) -> Self {
        let paths = &config.data_paths;
        let store = Arc::new(SessionStore::open(&paths.sessions_file));
        let sink: Arc<dyn LogSink> = Arc::new(JsonlSink::new(&paths.turns_log));
        info!("Turn log: {}", paths.turns_log.display());
        Self::new(config, store, host, agents, Some(sink))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Prune a session the host closed on its own.
    pub fn on_session_closed(&self, session_id: &str) -> Option<Session> {
        let removed = self.registry.on_session_closed(session_id)?;
        self.handshake.forget(&removed.agent_handle);
        Some(removed)
    }
}
