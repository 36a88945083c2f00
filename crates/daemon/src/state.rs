//! On-disk application state: the config directory and `config.toml`

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::retry::RetryPolicy;
use common::store::{EtcdConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use common::sync::{PollerConfig, DEFAULT_POLL_INTERVAL};

use crate::service_config::Config;

pub const APP_NAME: &str = "etcd-mirror";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_PORT: u16 = 3000;

/// Contents of `config.toml`. Every field has a default so partial files
/// are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory kept in sync with the root key
    pub folder: Option<PathBuf>,
    /// Root key; may be empty to mirror the whole keyspace
    pub key: String,
    /// etcd endpoints
    pub etcd: Vec<String>,
    /// HTTP listen port
    pub port: u16,
    pub poll_interval_secs: u64,
    pub dial_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub upload_created_files: bool,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub retry: RetryConfig,
    pub watch: WatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            folder: None,
            key: String::new(),
            etcd: Vec::new(),
            port: DEFAULT_PORT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            upload_created_files: true,
            log_dir: None,
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Backoff for store reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Reconnect behaviour of the remote watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Consecutive failed sessions tolerated before the daemon exits; unset
    /// means retry forever
    pub max_reconnects: Option<u32>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        let policy = RetryPolicy::reconnect();
        Self {
            reconnect_base_ms: policy.base_delay.as_millis() as u64,
            reconnect_max_ms: policy.max_delay.as_millis() as u64,
            max_reconnects: None,
        }
    }
}

impl WatchConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}

impl AppConfig {
    /// Validate and turn the file contents into a runnable service config.
    pub fn to_service_config(&self) -> Result<Config, StateError> {
        let folder = self.folder.clone().ok_or(StateError::MissingFolder)?;
        if self.etcd.is_empty() {
            return Err(StateError::MissingEndpoints);
        }
        let log_level = tracing::Level::from_str(&self.log_level)
            .map_err(|_| StateError::InvalidLogLevel(self.log_level.clone()))?;

        Ok(Config {
            folder,
            root_key: self.key.clone(),
            etcd: EtcdConfig {
                endpoints: self.etcd.clone(),
                dial_timeout: Duration::from_secs(self.dial_timeout_secs),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
            },
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            poller: PollerConfig {
                interval: Duration::from_secs(self.poll_interval_secs),
                upload_created_files: self.upload_created_files,
            },
            retry: self.retry.policy(),
            reconnect: self.watch.policy(),
            max_reconnects: self.watch.max_reconnects,
            log_level,
            log_dir: self.log_dir.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the config directory (~/.etcd-mirror by default)
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Resolve the config directory, `~/.etcd-mirror` unless overridden.
    pub fn config_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(dir) = custom {
            return Ok(dir);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Write a fresh `config.toml`. Refuses to clobber an existing one
    /// unless `force` is set.
    pub fn init(
        custom: Option<PathBuf>,
        config: AppConfig,
        force: bool,
    ) -> Result<Self, StateError> {
        let config_dir = Self::config_dir(custom)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() && !force {
            return Err(StateError::AlreadyInitialized(config_path));
        }

        fs::create_dir_all(&config_dir)?;
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            config_dir,
            config_path,
            config,
        })
    }

    /// Load an existing `config.toml`.
    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let config_dir = Self::config_dir(custom)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(config_dir));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        Ok(Self {
            config_dir,
            config_path,
            config,
        })
    }

    /// Like [`AppState::load`], but a missing file yields the defaults so the
    /// daemon can run from command-line flags alone.
    pub fn load_or_default(custom: Option<PathBuf>) -> Result<Self, StateError> {
        match Self::load(custom.clone()) {
            Err(StateError::NotInitialized(config_dir)) => Ok(Self {
                config_path: config_dir.join(CONFIG_FILE_NAME),
                config_dir,
                config: AppConfig::default(),
            }),
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine the home directory")]
    NoHomeDirectory,
    #[error("no config found in {0}; run `etcd-mirror init` first")]
    NotInitialized(PathBuf),
    #[error("config already exists at {0}; pass --force to overwrite")]
    AlreadyInitialized(PathBuf),
    #[error("no folder configured; set `folder` in config.toml or pass --folder")]
    MissingFolder,
    #[error("no etcd endpoints configured; set `etcd` in config.toml or pass --etcd")]
    MissingEndpoints,
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
