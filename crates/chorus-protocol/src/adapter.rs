//! Site adapters — per-site selectors and completion signals.
//!
//! The core treats these as opaque configuration. A few well-known sites are
//! built in; `adapters.json` in the data directory can add or replace entries.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Adapter used when a key is unknown.
pub const GENERIC_ADAPTER: &str = "generic";

/// Selectors locating messages and the prompt input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSelectors {
    pub user_message: String,
    pub assistant_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_button: Option<String>,
}

/// Signals the completion oracle reads to tell streaming from finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSignals {
    /// Present while the site is still generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_button: Option<String>,
    /// Present once generation has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerate_button: Option<String>,
    /// Class names that mark a streaming message.
    #[serde(default)]
    pub streaming_classes: Vec<String>,
    /// Selectors of controls shown only under a finished reply.
    #[serde(default)]
    pub completion_buttons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAdapter {
    pub name: String,
    pub selectors: AdapterSelectors,
    #[serde(default)]
    pub detection: DetectionSignals,
}

/// Lookup of adapters by key.
#[derive(Debug, Clone)]
pub struct AdapterTable {
    adapters: HashMap<String, SiteAdapter>,
}

impl AdapterTable {
    /// Table with only the built-in adapters.
    pub fn builtin() -> Self {
        let adapters = builtin_adapters()
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        Self { adapters }
    }

    /// Built-ins merged with overrides from a JSON file (an array of adapters).
    /// A missing or unreadable file leaves the built-ins untouched.
    pub fn load(path: &Path) -> Self {
        let mut table = Self::builtin();
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(_) => return table,
        };
        match serde_json::from_str::<Vec<SiteAdapter>>(&data) {
            Ok(overrides) => {
                info!("Loaded {} site adapters from {}", overrides.len(), path.display());
                for adapter in overrides {
                    table.insert(adapter);
                }
            }
            Err(e) => warn!("Ignoring adapter file {}: {}", path.display(), e),
        }
        table
    }

    pub fn insert(&mut self, adapter: SiteAdapter) {
        self.adapters.insert(adapter.name.to_lowercase(), adapter);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.adapters.contains_key(&key.to_lowercase())
    }

    /// Resolve a key, falling back to the generic adapter.
    pub fn resolve(&self, key: &str) -> SiteAdapter {
        self.adapters
            .get(&key.to_lowercase())
            .or_else(|| self.adapters.get(GENERIC_ADAPTER))
            .cloned()
            .unwrap_or_else(generic_adapter)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for AdapterTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn generic_adapter() -> SiteAdapter {
    SiteAdapter {
        name: GENERIC_ADAPTER.into(),
        selectors: AdapterSelectors {
            user_message: ".user-message".into(),
            assistant_message: ".assistant-message".into(),
            input: Some("textarea".into()),
            submit_button: Some("button[type=\"submit\"]".into()),
        },
        detection: DetectionSignals::default(),
    }
}

fn builtin_adapters() -> Vec<SiteAdapter> {
    vec![
        SiteAdapter {
            name: "chatgpt".into(),
            selectors: AdapterSelectors {
                user_message: "[data-message-author-role=\"user\"]".into(),
                assistant_message: "[data-message-author-role=\"assistant\"]".into(),
                input: Some("#prompt-textarea".into()),
                submit_button: Some("button[data-testid=\"send-button\"]".into()),
            },
            detection: DetectionSignals {
                stop_button: Some("button[data-testid=\"stop-button\"]".into()),
                regenerate_button: None,
                streaming_classes: vec!["result-streaming".into()],
                completion_buttons: vec!["button[data-testid=\"copy-turn-action-button\"]".into()],
            },
        },
        SiteAdapter {
            name: "claude".into(),
            selectors: AdapterSelectors {
                user_message: "[data-testid=\"user-message\"]".into(),
                assistant_message: ".font-claude-message".into(),
                input: Some("div[contenteditable=\"true\"]".into()),
                submit_button: Some("button[aria-label=\"Send message\"]".into()),
            },
            detection: DetectionSignals {
                stop_button: Some("button[aria-label=\"Stop response\"]".into()),
                regenerate_button: Some("button[aria-label=\"Retry\"]".into()),
                streaming_classes: Vec::new(),
                completion_buttons: Vec::new(),
            },
        },
        SiteAdapter {
            name: "gemini".into(),
            selectors: AdapterSelectors {
                user_message: "user-query".into(),
                assistant_message: "model-response".into(),
                input: Some("rich-textarea .ql-editor".into()),
                submit_button: Some("button.send-button".into()),
            },
            detection: DetectionSignals {
                stop_button: Some("button.stop".into()),
                regenerate_button: None,
                streaming_classes: vec!["streaming".into()],
                completion_buttons: vec!["message-actions".into()],
            },
        },
        generic_adapter(),
    ]
}
