//! Daemon configuration
//!
//! Loaded from `$XDG_CONFIG_HOME/admind/config.toml`. Every field has a
//! default, so a missing file yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use admind_utils::{paths, AdmindError, Result};

use crate::broadcast::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Socket to listen on; defaults to the runtime-dir socket
    pub socket_path: Option<PathBuf>,
    /// Log filter directive, e.g. "info" or "admind_server=debug"
    pub log_filter: String,
    /// Per-subscriber log queue capacity
    pub subscriber_queue_capacity: usize,
    /// Interval between drain re-checks during graceful stop, in ms
    pub drain_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            log_filter: "info".into(),
            subscriber_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_poll_ms: 100,
        }
    }
}

impl AppConfig {
    /// Load from the default config file, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file())
    }

    /// Load from a specific path, or defaults if the file does not exist
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| AdmindError::ConfigInvalid {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if config.subscriber_queue_capacity == 0 {
            return Err(AdmindError::ConfigInvalid {
                path: path.clone(),
                message: "subscriber_queue_capacity must be at least 1".into(),
            });
        }

        Ok(config)
    }

    /// Effective socket path
    pub fn socket(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(paths::socket_path)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}
