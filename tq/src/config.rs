//! TaskQueue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc;

/// Main TaskQueue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Daemon lifetime and control-plane configuration
    pub daemon: DaemonConfig,
}

/// Only the log level, so logging can be set up before the full config loads
#[derive(Debug, Default, Deserialize)]
struct LogLevelOnly {
    #[serde(rename = "log-level")]
    log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try user config: ~/.config/taskqueue/taskqueue.yml
        if let Some(user_config) = user_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, ignoring any error
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = config_path.cloned().or_else(user_config_path)?;
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<LogLevelOnly>(&content).ok()?.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("taskqueue").join("taskqueue.yml"))
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the history file and per-task output captures
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(".taskqueue"))
            .unwrap_or_else(|| PathBuf::from(".taskqueue"));
        Self { dir }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Control-plane socket
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,

    /// Election lock file; whoever holds it is the daemon
    #[serde(rename = "lock-path")]
    pub lock_path: PathBuf,

    /// Shut down after this long without requests, unless a task is running
    #[serde(rename = "idle-timeout-ms")]
    pub idle_timeout_ms: u64,

    /// Delay between the shutdown signal and process exit
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,

    /// Interval of the liveness indicator printed by the resident daemon
    #[serde(rename = "heartbeat-ms")]
    pub heartbeat_ms: u64,

    /// Task manager mailbox capacity; senders wait when it is full
    #[serde(rename = "mailbox-capacity")]
    pub mailbox_capacity: usize,

    /// Client-side timeout for each IPC read, write and connect
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: ipc::default_socket_path(),
            lock_path: ipc::default_lock_path(),
            idle_timeout_ms: 60_000,
            shutdown_grace_ms: 3_000,
            heartbeat_ms: 3_000,
            mailbox_capacity: 100,
            request_timeout_ms: 5_000,
        }
    }
}

impl DaemonConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Never zero; a zero interval is rejected by the timer
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
