//! Configuration management for ChatIM
//!
//! This crate handles loading and validating `.chatim/config.toml`

use chat_common::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the config file and local state
pub const CONFIG_DIR: &str = ".chatim";

/// Environment variable overriding `[session] user_id`
pub const ENV_USER: &str = "CHATIM_USER";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace root path (set programmatically, not in TOML)
    #[serde(skip)]
    pub root: PathBuf,

    /// Server endpoints
    #[serde(default)]
    pub server: ServerConfig,

    /// Local identity
    #[serde(default)]
    pub session: SessionConfig,

    /// Pull/snapshot cadence
    #[serde(default)]
    pub sync: SyncSettings,

    /// Push connection backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Durable state location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration ([server])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_base() -> String {
    "http://localhost:8081/api/v1".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:8081/ws".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_url: default_ws_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Session configuration ([session])
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Local user id, used to derive private conversation ids
    #[serde(default)]
    pub user_id: String,
}

/// Sync configuration ([sync])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_pull_limit")]
    pub pull_limit: u32,

    #[serde(default = "default_pull_interval_ms")]
    pub pull_interval_ms: u64,

    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    #[serde(default = "default_true")]
    pub snapshot_enabled: bool,
}

fn default_pull_limit() -> u32 {
    50
}
fn default_pull_interval_ms() -> u64 {
    30_000
}
fn default_snapshot_interval_ms() -> u64 {
    2_000
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            pull_limit: default_pull_limit(),
            pull_interval_ms: default_pull_interval_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            snapshot_enabled: true,
        }
    }
}

/// Reconnect configuration ([reconnect])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Storage configuration ([storage])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Relative paths resolve against the workspace root
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".chatim/state")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Template written by `chatim init`
pub const DEFAULT_CONFIG_TOML: &str = r#"# ChatIM Configuration

[server]
api_base = "http://localhost:8081/api/v1"
ws_url = "ws://localhost:8081/ws"
request_timeout_ms = 10000

[session]
user_id = ""

[sync]
pull_limit = 50
pull_interval_ms = 30000
snapshot_interval_ms = 2000
snapshot_enabled = true

[reconnect]
base_delay_ms = 1000
max_delay_ms = 30000
max_attempts = 5

[storage]
data_dir = ".chatim/state"
"#;

impl Config {
    /// Load configuration from workspace root
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = Self::path_in(workspace_root);

        if !config_path.exists() {
            return Ok(Self {
                root: workspace_root.to_path_buf(),
                ..Default::default()
            });
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ChatError::ConfigError(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| ChatError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.root = workspace_root.to_path_buf();
        Ok(config)
    }

    /// Location of the config file for a workspace
    pub fn path_in(workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_DIR).join("config.toml")
    }

    /// Apply `CHATIM_USER` if set
    pub fn apply_env(&mut self) {
        if let Ok(user) = std::env::var(ENV_USER) {
            if !user.trim().is_empty() {
                self.session.user_id = user.trim().to_string();
            }
        }
    }

    /// State directory resolved against the workspace root
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_absolute() {
            self.storage.data_dir.clone()
        } else {
            self.root.join(&self.storage.data_dir)
        }
    }
}
