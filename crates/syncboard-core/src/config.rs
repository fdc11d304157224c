//! Client configuration management.
//!
//! Holds the API base URL, where the session is persisted, and the last
//! email used to sign in. Stored at `~/.config/syncboard/config.json`;
//! `SYNCBOARD_API_URL` in the environment overrides the stored URL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{DurableStore, FileStore, KeyringStore, MemoryStore};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "syncboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_url`
pub const API_URL_ENV: &str = "SYNCBOARD_API_URL";

/// Where the session mirror lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub storage: StorageBackend,
    pub storage_dir: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub last_email: Option<String>,
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Saved without environment overrides applied by `load`
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.is_empty() {
                self.api_url = Some(url);
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the configured durable store. Without a usable location the
    /// session is kept in memory only.
    pub fn open_store(&self) -> Arc<dyn DurableStore> {
        match self.storage {
            StorageBackend::File => match self.storage_dir() {
                Ok(dir) => Arc::new(FileStore::new(dir)),
                Err(e) => {
                    warn!(error = %e, "No storage directory, session will not persist");
                    Arc::new(MemoryStore::new())
                }
            },
            StorageBackend::Keyring => Arc::new(KeyringStore::new()),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        }
    }
}
