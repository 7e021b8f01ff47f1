//! Session manager configuration.
//!
//! Holds the remote endpoint, the idle and refresh windows, the request
//! timeout and the list of activity signals the tracker listens for.
//!
//! Configuration is stored at `~/.config/coursedesk/session.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "coursedesk";

/// Config file name
const CONFIG_FILE: &str = "session.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// Sessions idle for more than a day are no longer trusted.
const DEFAULT_MAX_IDLE_SECS: u64 = 24 * 60 * 60;

/// Proactive refresh runs every 23 hours, inside the idle window.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 23 * 60 * 60;

/// 30s allows for slow responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Minimum spacing between writes of the last-active stamp to storage.
const DEFAULT_ACTIVITY_FLUSH_SECS: u64 = 60;

/// Upper bound for any configured window; larger values are clamped.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

const DEFAULT_ACTIVITY_SIGNALS: &[&str] = &[
    "pointerdown",
    "pointermove",
    "keypress",
    "scroll",
    "touchstart",
    "click",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub max_idle_secs: u64,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub activity_flush_secs: u64,
    pub activity_signals: Vec<String>,
    pub keyring_service: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            activity_flush_secs: DEFAULT_ACTIVITY_FLUSH_SECS,
            activity_signals: DEFAULT_ACTIVITY_SIGNALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keyring_service: APP_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load from the default location, or defaults if no file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the file-backed session store.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn max_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_idle_secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.clamp(1, MAX_WINDOW_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(MAX_WINDOW_SECS))
    }

    pub fn activity_flush(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.activity_flush_secs.min(MAX_WINDOW_SECS) as i64)
    }
}
