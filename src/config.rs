use crate::error::{CallSyncError, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Size of one upload part (4 MiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Interval between transcription status requests
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

pub const SERVER_URL_ENV: &str = "CALLSYNC_SERVER_URL";
pub const AUTH_TOKEN_ENV: &str = "CALLSYNC_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallSyncConfig {
    #[serde(rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(rename = "authToken")]
    pub auth_token: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "chunkSizeBytes", default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(rename = "pollIntervalMs", default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for CallSyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            username: None,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl CallSyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Apply `CALLSYNC_SERVER_URL` / `CALLSYNC_AUTH_TOKEN` on top of file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server_url = Some(url);
            }
        }
        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.auth_token = Some(token);
            }
        }
        self
    }

    /// Parsed server base URL, required for any backend call
    pub fn server_url(&self) -> Result<url::Url> {
        let raw = self
            .server_url
            .as_deref()
            .ok_or_else(|| CallSyncError::Config("No server URL configured".to_string()))?;
        url::Url::parse(raw)
            .map_err(|e| CallSyncError::Config(format!("Invalid server URL '{}': {}", raw, e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_some() {
            self.server_url()?;
        }
        if self.chunk_size_bytes == 0 {
            return Err(CallSyncError::Config(
                "chunkSizeBytes must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CallSyncError::Config(
                "pollIntervalMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".callsync"))
    } else {
        Err(CallSyncError::Config(
            "Could not find home directory".to_string(),
        ))
    }
}

pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("logs"))
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).context("Failed to create directory")?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<()> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<()> {
    ensure_private_dir(&get_logs_dir()?)
}

pub fn load_config_in(dir: &Path) -> Result<CallSyncConfig> {
    ensure_private_dir(dir)?;

    let config_file = dir.join("config.json");

    if config_file.exists() {
        let content = fs::read_to_string(&config_file).context("Failed to read config file")?;
        let config: CallSyncConfig = serde_json::from_str(&content)
            .map_err(|e| CallSyncError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    } else {
        Ok(CallSyncConfig::default())
    }
}

pub fn save_config_in(dir: &Path, config: &CallSyncConfig) -> Result<()> {
    config.validate()?;
    ensure_private_dir(dir)?;

    let config_file = dir.join("config.json");
    let content = serde_json::to_string_pretty(config)?;

    fs::write(&config_file, content).context("Failed to write config file")?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(&config_file)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(&config_file, permissions)?;
    }

    Ok(())
}

/// Load `~/.callsync/config.json` with environment overrides applied
pub fn load_config() -> Result<CallSyncConfig> {
    Ok(load_config_in(&get_config_dir()?)?.with_env_overrides())
}

pub fn save_config(config: &CallSyncConfig) -> Result<()> {
    save_config_in(&get_config_dir()?, config)
}

pub fn clear_config() -> Result<()> {
    save_config(&CallSyncConfig::default())
}
