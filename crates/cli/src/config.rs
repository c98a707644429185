// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Device configuration management.
//!
//! Configuration is stored in `config.toml` inside the data directory and
//! includes:
//! - `identity`: this device's id and the sender name it posts as
//! - `remote`: optional relay settings (absent means local-only)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::env;
use crate::error::{Error, Result};
use crate::sync::{EngineConfig, SupervisorConfig};
use crate::validate::validate_sender_id;

const APP_DIR_NAME: &str = "parley";
const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "messages.db";

/// Device configuration stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub identity: Identity,
    /// Relay settings (optional - if absent, messages stay queued locally).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

/// Who this device is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Random id generated at init. Seeds the HLC node id.
    pub device_id: String,
    /// Name other participants see.
    pub sender_id: String,
}

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket URL of the relay (`ws://...` or `wss://...`).
    pub url: String,
    /// First reconnect backoff ceiling in milliseconds (default: 250).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Largest reconnect delay in milliseconds (default: 30000).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive failed attempts before giving up (default: 0 = never).
    #[serde(default)]
    pub max_retries: u32,
    /// Max time for connecting plus the handshake in seconds (default: 5).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Heartbeat ping interval in milliseconds (default: 15000). 0 = disabled.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Max time to wait for pong response in milliseconds (default: 5000).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// How long `parley sync` waits to catch up, in seconds (default: 10).
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_sync_timeout_secs() -> u64 {
    10
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RemoteConfig {
            url: url.into(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sync_timeout_secs: default_sync_timeout_secs(),
        }
    }

    /// Validates that the URL is a WebSocket URL.
    ///
    /// Returns an error message if the URL is invalid.
    pub fn validate_url(&self) -> Option<String> {
        let url = &self.url;
        let rest = url.strip_prefix("ws://").or_else(|| url.strip_prefix("wss://"));
        match rest {
            Some(host) if !host.is_empty() => None,
            Some(_) => Some(format!("invalid remote URL '{url}': missing host")),
            None => Some(format!("invalid remote URL '{url}': must start with ws:// or wss://")),
        }
    }

    pub fn supervisor_config(&self, identity: &Identity) -> SupervisorConfig {
        let mut config =
            SupervisorConfig::new(&self.url, &identity.device_id, &identity.sender_id);
        config.backoff_base = Duration::from_millis(self.backoff_base_ms);
        config.backoff_max = Duration::from_millis(self.backoff_max_ms);
        config.max_retries = self.max_retries;
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            ..EngineConfig::default()
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

impl Config {
    /// Creates a config for a new device posting as `sender_id`.
    pub fn new(sender_id: &str) -> Result<Self> {
        let sender_id = validate_sender_id(sender_id)?;
        Ok(Config {
            identity: Identity {
                device_id: uuid::Uuid::new_v4().to_string(),
                sender_id: sender_id.to_string(),
            },
            remote: None,
        })
    }

    /// Loads configuration from the given data directory.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(Error::NotInitialized);
        }
        let content = fs::read_to_string(&config_path)
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        validate_sender_id(&config.identity.sender_id)?;
        Ok(config)
    }

    /// Returns the remote URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.url.as_str())
    }

    /// Saves configuration to the given data directory.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        fs::write(&config_path, content)?;
        Ok(())
    }
}

/// Resolve the data directory: `explicit`, then `PARLEY_DIR`, then the
/// platform data directory.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(dir) = env::data_dir() {
        return dir;
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR_NAME}")))
}

/// Get the database path inside a data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

/// Initialize a data directory for a new device.
pub fn init_data_dir(data_dir: &Path, sender_id: &str, remote: Option<&str>) -> Result<Config> {
    if data_dir.join(CONFIG_FILE_NAME).exists() {
        return Err(Error::AlreadyInitialized(data_dir.display().to_string()));
    }

    let mut config = Config::new(sender_id)?;
    if let Some(url) = remote {
        let remote = RemoteConfig::new(url);
        if let Some(problem) = remote.validate_url() {
            return Err(Error::Config(problem));
        }
        config.remote = Some(remote);
    }

    fs::create_dir_all(data_dir)?;
    config.save(data_dir)?;
    Ok(config)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
