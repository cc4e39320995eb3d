//! # ChatIM Sync Engine
//!
//! Client-side message synchronization for ChatIM.
//!
//! ## Architecture
//!
//! - **Push**: one WebSocket connection with exponential-backoff reconnect
//!   ([`ConnectionManager`])
//! - **Pull**: cursor-addressed catch-up over HTTP ([`ChatApi`])
//! - **Merge**: dedup-and-sort into the [`MessageCache`], client-derived unread
//!   counts in the [`ConversationDirectory`]
//! - **Durability**: monotonic [`CursorStore`] plus a debounced
//!   [`SnapshotStore`] for instant reload
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chat_sync::{HttpChatApi, Session, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig {
//!         user_id: "U1".to_string(),
//!         ..Default::default()
//!     };
//!     let api = HttpChatApi::new(&config.api_base, "credential", config.request_timeout)?;
//!
//!     let mut session = Session::new(config, api)?;
//!     session.start("credential")?;
//!     let end = session.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     println!("session ended: {:?}", end);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod directory;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod snapshot;

pub use api::{ChatApi, HttpChatApi};
pub use cache::{MergeOutcome, MessageCache};
pub use config::SyncConfig;
pub use connection::{
    BackoffPolicy, ConnectionEvent, ConnectionManager, ConnectionState, ReconnectMachine,
    Transition,
};
pub use cursor::CursorStore;
pub use directory::ConversationDirectory;
pub use engine::{PullSummary, PushOutcome, SyncEngine};
pub use protocol::{PullResponse, RawConversation, RawMessage};
pub use session::{Session, SessionCommand, SessionEnd, SessionHandle};
pub use snapshot::{Snapshot, SnapshotStore};

use chat_common::{sanitizer::redact, ChatError, ConversationId};

/// Common result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ChatError),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),
}

impl SyncError {
    /// Terminal condition requiring re-authentication
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Failure that the next pull/backoff cycle retries naturally
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Server { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status)
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN =>
            {
                SyncError::Auth(format!("HTTP {}", status))
            }
            _ => SyncError::Transport(redact(&e.to_string())),
        }
    }
}

impl From<bincode::Error> for SyncError {
    fn from(e: bincode::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}
