//! Common types and errors for ChatIM
//!
//! This crate provides the canonical message model shared by the sync engine,
//! the CLI and the test helpers. Wire payloads are normalized into these types
//! at the boundary; nothing downstream sees raw JSON.

pub mod model;
pub mod sanitizer;
pub mod telemetry;
pub mod time;

pub use model::{Conversation, ConversationId, ConversationKind, Message, StreamToken};

use thiserror::Error;

/// Errors raised while building or parsing model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Invalid stream token: {0:?}")]
    InvalidStreamToken(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("Unknown conversation kind: {0:?}")]
    UnknownKind(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ChatError>;

/// Exit code constants for the `chatim` binary
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_AUTH: i32 = 3;
pub const EXIT_CONFIG_ERROR: i32 = 101;
