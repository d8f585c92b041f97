//! Settings file handling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use outpost_core::{DispatchConfig, ExponentialBackoff};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "outpost";

/// Settings loaded from `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Database file; defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Seconds between passes in `run` mode.
    pub poll_interval_secs: u64,
    /// Dispatch tunables.
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_secs: 30,
            dispatch: DispatchSettings::default(),
        }
    }
}

/// Dispatch tunables in file-friendly units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub batch_size: u32,
    pub max_retries: u32,
    pub lease_secs: u64,
    pub transport_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let config = DispatchConfig::default();
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            lease_secs: config.lease.as_secs(),
            transport_timeout_secs: config.transport_timeout.as_secs(),
            backoff_base_secs: config.backoff.base.as_secs(),
            backoff_max_secs: config.backoff.max.as_secs(),
        }
    }
}

impl DispatchSettings {
    /// Convert into the library configuration.
    pub const fn to_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            lease: Duration::from_secs(self.lease_secs),
            transport_timeout: Duration::from_secs(self.transport_timeout_secs),
            backoff: ExponentialBackoff::new(
                Duration::from_secs(self.backoff_base_secs),
                Duration::from_secs(self.backoff_max_secs),
            ),
        }
    }
}

impl Settings {
    /// Database path, falling back to `<data_dir>/outpost/outpost.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("outpost.db")
        })
    }

    /// Poll interval for `run` mode.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Default settings file location.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("settings.json")
}

/// Load settings from `path`. A missing file yields defaults.
pub async fn load(path: &Path) -> anyhow::Result<Settings> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(Settings::default());
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}
