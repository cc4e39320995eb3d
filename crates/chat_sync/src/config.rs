//! Configuration for sync engine

use crate::connection::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// HTTP API base, e.g. `http://host/api/v1`
    pub api_base: String,

    /// WebSocket push feed URL
    pub ws_url: String,

    /// Local user id
    pub user_id: String,

    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Duration,

    /// Messages per conversation requested by each pull
    pub pull_limit: u32,

    /// Periodic catch-up pull (default: 30 seconds)
    pub pull_interval: Duration,

    /// Debounce for snapshot writes (default: 2 seconds)
    pub snapshot_interval: Duration,

    /// Mirror directory + cache to disk
    pub snapshot_enabled: bool,

    /// Push connection backoff
    pub reconnect: BackoffPolicy,

    /// Root of durable state; one subdirectory per user
    pub data_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8081/api/v1".to_string(),
            ws_url: "ws://localhost:8081/ws".to_string(),
            user_id: String::new(),
            request_timeout: Duration::from_secs(10),
            pull_limit: 50,
            pull_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(2),
            snapshot_enabled: true,
            reconnect: BackoffPolicy::default(),
            data_dir: PathBuf::from(".chatim/state"),
        }
    }
}

impl SyncConfig {
    /// Build from the workspace config file
    pub fn from_config(config: &chat_config::Config) -> Self {
        Self {
            api_base: config.server.api_base.clone(),
            ws_url: config.server.ws_url.clone(),
            user_id: config.session.user_id.clone(),
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            pull_limit: config.sync.pull_limit,
            pull_interval: Duration::from_millis(config.sync.pull_interval_ms),
            snapshot_interval: Duration::from_millis(config.sync.snapshot_interval_ms),
            snapshot_enabled: config.sync.snapshot_enabled,
            reconnect: BackoffPolicy {
                base_delay: Duration::from_millis(config.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(config.reconnect.max_delay_ms),
                max_attempts: config.reconnect.max_attempts,
            },
            data_dir: config.data_dir(),
        }
    }

    /// Per-user state directory (cursor + snapshot)
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join(&self.user_id)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user_id.trim().is_empty() {
            anyhow::bail!("user_id cannot be empty");
        }
        if self.user_id.contains(['/', '\\']) || self.user_id.contains("..") {
            anyhow::bail!("user_id must not contain path separators");
        }
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            anyhow::bail!("ws_url must start with ws:// or wss://");
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            anyhow::bail!("api_base must start with http:// or https://");
        }
        if self.pull_limit == 0 {
            anyhow::bail!("pull_limit must be greater than zero");
        }
        if self.pull_interval.is_zero() || self.snapshot_interval.is_zero() {
            anyhow::bail!("pull and snapshot intervals must be non-zero");
        }
        if self.reconnect.base_delay.is_zero() || self.reconnect.base_delay > self.reconnect.max_delay {
            anyhow::bail!("reconnect delays must satisfy 0 < base_delay <= max_delay");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SyncConfig {
        SyncConfig {
            user_id: "U1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_requires_user() {
        assert!(SyncConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_http_push_url() {
        let config = SyncConfig {
            ws_url: "http://localhost:8081/ws".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = valid();
        config.reconnect.base_delay = Duration::from_secs(60);
        config.reconnect.max_delay = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_workspace_config() {
        let mut workspace = chat_config::Config::default();
        workspace.root = PathBuf::from("/srv/chat");
        workspace.session.user_id = "U9".to_string();
        workspace.reconnect.max_attempts = 3;

        let config = SyncConfig::from_config(&workspace);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.state_dir(), PathBuf::from("/srv/chat/.chatim/state/U9"));
        assert!(config.validate().is_ok());
    }
}
