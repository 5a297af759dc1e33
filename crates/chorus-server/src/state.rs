//! Shared application state.

use std::sync::Arc;

use chorus_browser::Controller;
use chorus_core::ChorusConfig;
use chorus_protocol::AdapterTable;
use tracing::info;

use crate::relay::Relay;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: ChorusConfig,
    pub relay: Arc<Relay>,
    pub controller: Controller,
    pub started_at: String,
}

impl AppState {
    pub fn new(config: ChorusConfig) -> Self {
        let adapters = AdapterTable::load(&config.data_paths.adapters_file);
        info!("Site adapters: {}", adapters.keys().join(", "));

        let relay = Arc::new(Relay::new(adapters, config.timing.submit_timeout()));
        let controller = Controller::open(&config, relay.clone(), relay.clone());

        Self {
            config,
            relay,
            controller,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
