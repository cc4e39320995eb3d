//! Canonical message model

use crate::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a message in the server's delivery stream.
///
/// Tokens are stream entry ids of the form `<millis>-<seq>` and compare
/// numerically, so `"9-0" < "10-0"` even though the strings do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamToken {
    millis: u64,
    seq: u64,
}

impl StreamToken {
    /// Beginning of stream
    pub const ZERO: StreamToken = StreamToken { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Default for StreamToken {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for StreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamToken {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || ChatError::InvalidStreamToken(s.to_string());

        let (millis, seq) = match trimmed.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (trimmed, "0"),
        };

        let millis = millis.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { millis, seq })
    }
}

/// Private (one-to-one) or group conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(ConversationKind::Private),
            "group" => Ok(ConversationKind::Group),
            _ => Err(ChatError::UnknownKind(s.to_string())),
        }
    }
}

/// `{private|group}:{peer_id}`
///
/// For private conversations the peer is the counterpart user, for groups it
/// is the group id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId {
    kind: ConversationKind,
    peer_id: String,
}

impl ConversationId {
    pub fn new(kind: ConversationKind, peer_id: impl Into<String>) -> Result<Self> {
        let peer_id = peer_id.into();
        if peer_id.trim().is_empty() {
            return Err(ChatError::InvalidConversationId(format!("{}:", kind)));
        }
        Ok(Self { kind, peer_id })
    }

    pub fn private(peer_id: impl Into<String>) -> Result<Self> {
        Self::new(ConversationKind::Private, peer_id)
    }

    pub fn group(group_id: impl Into<String>) -> Result<Self> {
        Self::new(ConversationKind::Group, group_id)
    }

    pub fn kind(&self) -> ConversationKind {
        self.kind
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.peer_id)
    }
}

impl FromStr for ConversationId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, peer) = s
            .split_once(':')
            .ok_or_else(|| ChatError::InvalidConversationId(s.to_string()))?;
        let kind = kind
            .parse::<ConversationKind>()
            .map_err(|_| ChatError::InvalidConversationId(s.to_string()))?;
        Self::new(kind, peer).map_err(|_| ChatError::InvalidConversationId(s.to_string()))
    }
}

/// A single chat message in canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id; `None` for optimistic local entries
    pub id: Option<String>,

    pub stream_token: Option<StreamToken>,

    pub conversation_id: ConversationId,

    pub sender_id: String,

    /// Best-effort, resolved lazily
    pub sender_display_name: Option<String>,

    pub content: String,

    /// Epoch milliseconds
    pub created_at: i64,

    pub kind: ConversationKind,

    /// Authored by the local user
    pub is_self: bool,

    /// Read flag as reported by the server
    pub is_read: bool,
}

impl Message {
    /// Ordering key: `created_at`, then stream token
    pub fn order_key(&self) -> (i64, Option<StreamToken>) {
        (self.created_at, self.stream_token)
    }
}

/// Summary row of the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,

    pub peer_display_name: String,

    pub peer_avatar: Option<String>,

    pub last_message_preview: String,

    /// Epoch milliseconds, 0 when the conversation has no messages yet
    pub last_message_time: i64,

    /// Client-derived; never copied from server responses
    pub unread_count: u32,

    pub is_pinned: bool,
}

impl Conversation {
    pub fn new(id: ConversationId, peer_display_name: impl Into<String>) -> Self {
        Self {
            id,
            peer_display_name: peer_display_name.into(),
            peer_avatar: None,
            last_message_preview: String::new(),
            last_message_time: 0,
            unread_count: 0,
            is_pinned: false,
        }
    }

    pub fn kind(&self) -> ConversationKind {
        self.id.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_token_numeric_ordering() {
        let a: StreamToken = "9-0".parse().unwrap();
        let b: StreamToken = "10-0".parse().unwrap();
        let c: StreamToken = "10-2".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.to_string(), "10-2");
    }

    #[test]
    fn test_stream_token_bare_millis() {
        let t: StreamToken = "1700000000000".parse().unwrap();
        assert_eq!(t, StreamToken::new(1_700_000_000_000, 0));
        assert!("0-0".parse::<StreamToken>().unwrap().is_zero());
    }

    #[test]
    fn test_stream_token_rejects_garbage() {
        assert!("abc".parse::<StreamToken>().is_err());
        assert!("1-x".parse::<StreamToken>().is_err());
        assert!("".parse::<StreamToken>().is_err());
    }

    #[test]
    fn test_conversation_id_roundtrip() {
        let id: ConversationId = "private:U2".parse().unwrap();
        assert_eq!(id.kind(), ConversationKind::Private);
        assert_eq!(id.peer_id(), "U2");
        assert_eq!(id.to_string(), "private:U2");

        let group = ConversationId::group("g-7").unwrap();
        assert_eq!(group.to_string(), "group:g-7");
    }

    #[test]
    fn test_conversation_id_rejects_malformed() {
        assert!("private".parse::<ConversationId>().is_err());
        assert!("channel:1".parse::<ConversationId>().is_err());
        assert!("group:".parse::<ConversationId>().is_err());
        assert!(ConversationId::private("  ").is_err());
    }
}
