//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Paths to all chorus data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Persisted session registry (`data/sessions.json`).
    pub sessions_file: PathBuf,
    /// Completed-turn log (`data/turns.jsonl`).
    pub turns_log: PathBuf,
    /// Optional site adapter overrides (`data/adapters.json`).
    pub adapters_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            sessions_file: root.join("sessions.json"),
            turns_log: root.join("turns.jsonl"),
            adapters_file: root.join("adapters.json"),
            root,
        })
    }
}

/// Timeouts and settle intervals used by the controller and the agents.
///
/// All values are milliseconds so they round-trip through env vars and JSON
/// without unit confusion; use the accessor methods to get [`Duration`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub probe_timeout_ms: u64,
    pub install_settle_ms: u64,
    pub submit_timeout_ms: u64,
    /// Extra wait before the last session of a dispatch batch. 0 disables it.
    pub last_session_settle_ms: u64,
    pub quiet_period_ms: u64,
    pub emit_cooldown_ms: u64,
    pub delivery_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1500,
            install_settle_ms: 500,
            submit_timeout_ms: 15_000,
            last_session_settle_ms: 1000,
            quiet_period_ms: 2000,
            emit_cooldown_ms: 500,
            delivery_timeout_ms: 5000,
        }
    }
}

impl Timing {
    /// Build timing from a variable lookup, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        Self {
            probe_timeout_ms: read("CHORUS_PROBE_TIMEOUT_MS", defaults.probe_timeout_ms),
            install_settle_ms: read("CHORUS_INSTALL_SETTLE_MS", defaults.install_settle_ms),
            submit_timeout_ms: read("CHORUS_SUBMIT_TIMEOUT_MS", defaults.submit_timeout_ms),
            last_session_settle_ms: read(
                "CHORUS_LAST_SESSION_SETTLE_MS",
                defaults.last_session_settle_ms,
            ),
            quiet_period_ms: read("CHORUS_QUIET_PERIOD_MS", defaults.quiet_period_ms),
            emit_cooldown_ms: read("CHORUS_EMIT_COOLDOWN_MS", defaults.emit_cooldown_ms),
            delivery_timeout_ms: read("CHORUS_DELIVERY_TIMEOUT_MS", defaults.delivery_timeout_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn install_settle(&self) -> Duration {
        Duration::from_millis(self.install_settle_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn last_session_settle(&self) -> Duration {
        Duration::from_millis(self.last_session_settle_ms)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn emit_cooldown(&self) -> Duration {
        Duration::from_millis(self.emit_cooldown_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Host patterns refused as session targets unless overridden.
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "*.internal"];

/// Top-level chorus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub timing: Timing,
    /// Host patterns (`example.com` or `*.example.com`) that may not be opened.
    pub blocked_hosts: Vec<String>,
}

impl ChorusConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_vars(data_dir, |key| std::env::var(key).ok())
    }

    /// Same as [`ChorusConfig::from_env`] with an explicit variable source.
    pub fn from_vars(
        data_dir: impl AsRef<Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT '{}' is not a valid port", p)))?,
            None => 3010,
        };

        let blocked_hosts = match lookup("CHORUS_BLOCKED_HOSTS") {
            Some(list) => list
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            None => DEFAULT_BLOCKED_HOSTS.iter().map(|h| h.to_string()).collect(),
        };

        let data_paths = DataPaths::new(data_dir)?;
        let timing = Timing::from_vars(&lookup);

        Ok(Self {
            port,
            data_paths,
            timing,
            blocked_hosts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_vars() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChorusConfig::from_vars(dir.path(), |_| None).unwrap();
        assert_eq!(config.port, 3010);
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.blocked_hosts.len(), DEFAULT_BLOCKED_HOSTS.len());
        assert!(config.data_paths.sessions_file.ends_with("sessions.json"));
    }

    #[test]
    fn test_overrides_from_vars() {
        let dir = tempfile::tempdir().unwrap();
        let vars: HashMap<&str, &str> = [
            ("PORT", "4000"),
            ("CHORUS_QUIET_PERIOD_MS", "750"),
            ("CHORUS_LAST_SESSION_SETTLE_MS", "0"),
            ("CHORUS_PROBE_TIMEOUT_MS", "not-a-number"),
            ("CHORUS_BLOCKED_HOSTS", " Example.com , ,*.corp "),
        ]
        .into_iter()
        .collect();

        let config =
            ChorusConfig::from_vars(dir.path(), |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.timing.quiet_period(), Duration::from_millis(750));
        assert_eq!(config.timing.last_session_settle_ms, 0);
        // Unparsable values fall back to the default
        assert_eq!(config.timing.probe_timeout_ms, 1500);
        assert_eq!(config.blocked_hosts, vec!["example.com", "*.corp"]);
    }

    #[test]
    fn test_bad_port_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChorusConfig::from_vars(dir.path(), |k| {
            (k == "PORT").then(|| "eighty".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("eighty"));
    }
}
