//! Application configuration management.
//!
//! Holds the producer endpoint, reconnect and keepalive tuning, and logging
//! preferences. Configuration is persisted as TOML on disk; every field has
//! a default so a partial file is always accepted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{RlError, RlResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Producer connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Producer connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the game plugin.
    #[serde(default = "default_url")]
    pub url: String,

    /// Reconnect attempts allowed between two successful connections.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay of the exponential backoff, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of a single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random jitter (0.0 to 1.0) applied to each delay. 0 disables jitter.
    #[serde(default)]
    pub jitter_factor: f64,

    /// Interval between keepalive pings, in milliseconds.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Capacity of the inbound frame channel of one socket.
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_url() -> String {
    constants::DEFAULT_URL.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    constants::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    constants::DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    constants::DEFAULT_MAX_DELAY_MS
}

fn default_keepalive_interval_ms() -> u64 {
    constants::DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_frame_buffer() -> usize {
    constants::DEFAULT_FRAME_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
            keepalive_interval_ms: default_keepalive_interval_ms(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ConnectionConfig {
    /// Base backoff delay as a Duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff cap as a Duration.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Keepalive interval as a Duration.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Reject values the connection manager cannot work with.
    pub fn validate(&self) -> RlResult<()> {
        if self.url.is_empty() {
            return Err(RlError::MissingConfig("connection.url".into()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(RlError::Config(
                "connection.keepalive_interval_ms must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(RlError::Config(
                "connection.jitter_factor must be between 0.0 and 1.0".into(),
            ));
        }
        if self.frame_buffer == 0 {
            return Err(RlError::Config(
                "connection.frame_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> RlResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> RlResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&contents)?;
        config.connection.url = Self::sanitize_url(&config.connection.url);
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> RlResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> RlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RlError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> RlResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> RlResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Sanitize and normalize a producer URL.
    ///
    /// Adds a `ws://` scheme when none is given, maps `http(s)` to `ws(s)`
    /// and strips trailing slashes.
    pub fn sanitize_url(url: &str) -> String {
        let trimmed = url.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: None,
        }
    }

    /// Remember the file this configuration was loaded from; `save` writes back to it.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// The file `save` writes to.
    pub fn path(&self) -> RlResult<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => AppConfig::default_config_path(),
        }
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> RlResult<()> {
        let path = self.path()?;
        self.inner.read().await.save_to_file(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.connection.url, "ws://localhost:49122");
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.connection.keepalive_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
        assert!(config.connection.validate().is_ok());
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(AppConfig::sanitize_url("localhost:49122"), "ws://localhost:49122");
        assert_eq!(AppConfig::sanitize_url("http://10.0.0.2:49122/"), "ws://10.0.0.2:49122");
        assert_eq!(AppConfig::sanitize_url("https://relay.example.com"), "wss://relay.example.com");
        assert_eq!(AppConfig::sanitize_url("  \"ws://127.0.0.1:1/\"  "), "ws://127.0.0.1:1");
        assert_eq!(AppConfig::sanitize_url("   "), "");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [connection]
            max_reconnect_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.max_reconnect_attempts, 2);
        assert_eq!(config.connection.url, constants::DEFAULT_URL);
        assert_eq!(config.connection.base_delay_ms, 1_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ConnectionConfig::default();
        config.keepalive_interval_ms = 0;
        assert!(matches!(config.validate(), Err(RlError::Config(_))));

        let mut config = ConnectionConfig::default();
        config.url.clear();
        assert!(matches!(config.validate(), Err(RlError::MissingConfig(_))));

        let mut config = ConnectionConfig::default();
        config.jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.connection.url = "ws://127.0.0.1:5000".into();
        config.connection.keepalive_interval_ms = 5_000;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.url, "ws://127.0.0.1:5000");
        assert_eq!(loaded.connection.keepalive_interval_ms, 5_000);
    }

    #[test]
    fn test_load_sanitizes_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[connection]\nurl = \"localhost:49122/\"\n").unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.url, "ws://localhost:49122");
    }

    #[tokio::test]
    async fn test_config_handle_save_uses_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let handle = ConfigHandle::new(AppConfig::default()).with_path(path.clone());

        handle.write().await.connection.max_reconnect_attempts = 9;
        handle.save().await.unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.max_reconnect_attempts, 9);
    }
}
