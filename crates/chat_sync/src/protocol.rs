//! Wire types for the push and pull feeds
//!
//! The server is loose about field names and value types (ids arrive as
//! strings or numbers, timestamps as seconds, milliseconds or RFC 3339), so
//! every alias is a separate optional field and [`RawMessage::normalize`]
//! coalesces them into the canonical [`Message`]. Nothing past this module
//! sees raw payloads.

use chat_common::{time, ChatError, ConversationId, ConversationKind, Message, StreamToken};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::ops::Deref;

/// Accept a string or a number; empty strings and `null` become `None`
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Message text: a string (possibly empty) or a number
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Flags arrive as booleans, 0/1, or strings (stream values are stored as
/// text). Anything else is treated as absent.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// A JSON array decoded entry by entry. Entries that do not decode are
/// counted and dropped so one bad item cannot sink the whole body; `null`
/// or a missing field is an empty list.
#[derive(Debug, Clone)]
pub struct Entries<T> {
    items: Vec<T>,
    rejected: usize,
}

impl<T> Entries<T> {
    /// Entries that failed to decode
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: 0,
        }
    }
}

impl<T> From<Vec<T>> for Entries<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items, rejected: 0 }
    }
}

impl<T> Deref for Entries<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for Entries<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Entries<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut entries = Entries::default();
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => {}
            Some(Value::Array(values)) => {
                for value in values {
                    match serde_json::from_value(value) {
                        Ok(item) => entries.items.push(item),
                        Err(e) => {
                            tracing::warn!("Dropping undecodable entry: {}", e);
                            entries.rejected += 1;
                        }
                    }
                }
            }
            Some(other) => {
                tracing::warn!("Expected an array, got {}", other);
                entries.rejected += 1;
            }
        }
        Ok(entries)
    }
}

/// A message as it appears on either feed
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg_id: Option<String>,

    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub r#type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub from_user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub to_user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub to: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub group: Option<String>,

    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,

    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default, rename = "createdAt")]
    pub created_at_camel: Option<Value>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub stream_id: Option<String>,
    #[serde(default, rename = "streamToken", deserialize_with = "lenient_string")]
    pub stream_token_camel: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stream_token: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub from_user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_read: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_sender: Option<bool>,
}

impl RawMessage {
    /// Parse one push event
    pub fn from_push(payload: &str) -> Result<Self, ChatError> {
        serde_json::from_str(payload).map_err(|e| ChatError::ParseError(e.to_string()))
    }

    pub fn sender(&self) -> Option<&str> {
        self.from_user_id
            .as_deref()
            .or(self.from.as_deref())
            .or(self.sender_id.as_deref())
    }

    fn server_id(&self) -> Option<String> {
        self.id.clone().or_else(|| self.msg_id.clone())
    }

    fn kind(&self, hint: Option<&ConversationId>) -> Result<ConversationKind, ChatError> {
        if let Some(kind) = self.r#type.as_deref().or(self.kind.as_deref()) {
            return kind.parse();
        }
        if let Some(hint) = hint {
            return Ok(hint.kind());
        }
        if self.group_id.is_some() || self.group.is_some() {
            return Ok(ConversationKind::Group);
        }
        Ok(ConversationKind::Private)
    }

    fn stream_token(&self) -> Result<Option<StreamToken>, ChatError> {
        self.stream_id
            .as_deref()
            .or(self.stream_token_camel.as_deref())
            .or(self.stream_token.as_deref())
            .map(str::parse)
            .transpose()
    }

    /// Derive the conversation the message belongs to.
    ///
    /// Groups are keyed by group id. For private messages the counterpart is
    /// whichever of sender/recipient is not `local_user`. `hint` (the
    /// enclosing conversation of a pulled message) fills in what the payload
    /// omits.
    fn conversation_id(
        &self,
        kind: ConversationKind,
        sender: &str,
        local_user: &str,
        hint: Option<&ConversationId>,
    ) -> Result<ConversationId, ChatError> {
        let hinted = hint.filter(|h| h.kind() == kind).map(|h| h.peer_id());
        let peer = match kind {
            ConversationKind::Group => self
                .group_id
                .as_deref()
                .or(self.group.as_deref())
                .or(hinted)
                .ok_or(ChatError::MissingField("group_id"))?,
            ConversationKind::Private if sender == local_user => self
                .to_user_id
                .as_deref()
                .or(self.to.as_deref())
                .or(hinted)
                .ok_or(ChatError::MissingField("to_user_id"))?,
            ConversationKind::Private => sender,
        };
        ConversationId::new(kind, peer)
    }

    /// Normalize into the canonical model
    pub fn normalize(
        self,
        local_user: &str,
        hint: Option<&ConversationId>,
    ) -> Result<Message, ChatError> {
        let kind = self.kind(hint)?;
        let sender = self
            .sender()
            .ok_or(ChatError::MissingField("from_user_id"))?
            .to_string();
        let conversation_id = self.conversation_id(kind, &sender, local_user, hint)?;
        let stream_token = self.stream_token()?;
        let created_at = self
            .created_at
            .as_ref()
            .or(self.created_at_camel.as_ref())
            .filter(|v| !v.is_null())
            .ok_or(ChatError::MissingField("created_at"))
            .and_then(time::from_json)?;

        let id = self.server_id();
        let is_self = sender == local_user || self.is_sender == Some(true);
        let content = self.content.ok_or(ChatError::MissingField("content"))?;

        Ok(Message {
            id,
            stream_token,
            conversation_id,
            sender_display_name: self.from_user_name.or(self.sender_name),
            sender_id: sender,
            content,
            created_at,
            kind,
            is_self,
            is_read: self.is_read.unwrap_or(false),
        })
    }
}

/// A conversation entry of the pull response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConversation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub conversation_id: Option<String>,

    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub r#type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub peer_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub peer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub peer_avatar: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub avatar: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_pinned: Option<bool>,

    #[serde(default)]
    pub messages: Entries<RawMessage>,
}

impl RawConversation {
    /// `conversation_id` when present, else `kind` + `peer_id`
    pub fn conversation_id(&self) -> Result<ConversationId, ChatError> {
        if let Some(id) = &self.conversation_id {
            return id.parse();
        }
        let kind = self
            .r#type
            .as_deref()
            .or(self.kind.as_deref())
            .ok_or(ChatError::MissingField("type"))?
            .parse()?;
        let peer = self
            .peer_id
            .as_deref()
            .ok_or(ChatError::MissingField("peer_id"))?;
        ConversationId::new(kind, peer)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.peer_name.as_deref().or(self.title.as_deref())
    }

    pub fn avatar(&self) -> Option<&str> {
        self.peer_avatar.as_deref().or(self.avatar.as_deref())
    }
}

/// Body of `GET /messages`
///
/// Server-side unread counters in the body are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub conversations: Entries<RawConversation>,
}

/// Body of the send endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub msg: Option<RawMessage>,
}

/// Status fields every response carries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Application-level auth failure codes
const AUTH_CODES: [i64; 2] = [401, 1003];

impl Envelope {
    /// `code` absent, 0 or 200 is success; auth codes map to `Auth`; an
    /// `error` string is a failure regardless of `code`.
    pub fn check(&self) -> crate::Result<()> {
        let message = || {
            self.error
                .clone()
                .or_else(|| self.message.clone())
                .unwrap_or_default()
        };

        match self.code {
            Some(code) if AUTH_CODES.contains(&code) => Err(crate::SyncError::Auth(message())),
            Some(code) if code != 0 && code != 200 => Err(crate::SyncError::Server {
                code,
                message: message(),
            }),
            _ if self.error.is_some() => Err(crate::SyncError::Server {
                code: self.code.unwrap_or(-1),
                message: message(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_push_from_peer() {
        let message = raw(json!({
            "id": "m1",
            "kind": "private",
            "from": "U2",
            "to": "U1",
            "content": "hello",
            "createdAt": 1_700_000_000,
            "streamToken": "1700000000000-0"
        }))
        .normalize("U1", None)
        .unwrap();

        assert_eq!(message.conversation_id.to_string(), "private:U2");
        assert_eq!(message.created_at, 1_700_000_000_000);
        assert_eq!(message.stream_token, Some(StreamToken::new(1_700_000_000_000, 0)));
        assert!(!message.is_self);
    }

    #[test]
    fn test_own_private_message_keys_on_recipient() {
        let message = raw(json!({
            "msg_id": 77,
            "type": "private",
            "from_user_id": "U1",
            "to_user_id": "U9",
            "content": "hi",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .normalize("U1", None)
        .unwrap();

        assert_eq!(message.conversation_id.to_string(), "private:U9");
        assert_eq!(message.id.as_deref(), Some("77"));
        assert!(message.is_self);
        assert_eq!(message.created_at, 1_704_067_200_000);
    }

    #[test]
    fn test_group_message() {
        let message = raw(json!({
            "id": "g-1",
            "type": "group",
            "from_user_id": "U3",
            "from_user_name": "Carol",
            "group_id": "G7",
            "content": "standup",
            "created_at": 1_700_000_000_123_i64,
            "stream_id": "1700000000123-4"
        }))
        .normalize("U1", None)
        .unwrap();

        assert_eq!(message.conversation_id.to_string(), "group:G7");
        assert_eq!(message.sender_display_name.as_deref(), Some("Carol"));
        assert_eq!(message.created_at, 1_700_000_000_123);
    }

    #[test]
    fn test_hint_fills_missing_fields() {
        let hint: ConversationId = "private:U2".parse().unwrap();
        let message = raw(json!({
            "from_user_id": "U1",
            "content": "sent from another device",
            "created_at": 1_700_000_000
        }))
        .normalize("U1", Some(&hint))
        .unwrap();

        assert_eq!(message.conversation_id, hint);
        assert!(message.is_self);
    }

    #[test]
    fn test_rejects_incomplete_payloads() {
        let no_sender = raw(json!({"content": "x", "created_at": 1}));
        assert_eq!(
            no_sender.normalize("U1", None).unwrap_err(),
            ChatError::MissingField("from_user_id")
        );

        let bad_token = raw(json!({
            "from": "U2", "content": "x", "created_at": 1, "stream_id": "abc"
        }));
        assert!(matches!(
            bad_token.normalize("U1", None),
            Err(ChatError::InvalidStreamToken(_))
        ));

        let bad_kind = raw(json!({
            "type": "friend_request", "from": "U2", "content": "x", "created_at": 1
        }));
        assert!(matches!(
            bad_kind.normalize("U1", None),
            Err(ChatError::UnknownKind(_))
        ));

        assert!(RawMessage::from_push("{not json").is_err());
    }

    #[test]
    fn test_pull_response_shapes() {
        let response: PullResponse = serde_json::from_value(json!({
            "code": 0,
            "total_unread": 42,
            "conversations": [
                {"conversation_id": "group:G1", "peer_name": "Team", "unread_count": 9, "messages": null},
                {"type": "private", "peer_id": 12, "title": "Bob", "avatar": "a.png"}
            ]
        }))
        .unwrap();

        assert_eq!(response.conversations.len(), 2);
        assert_eq!(
            response.conversations[0].conversation_id().unwrap().to_string(),
            "group:G1"
        );
        let second = &response.conversations[1];
        assert_eq!(second.conversation_id().unwrap().to_string(), "private:12");
        assert_eq!(second.display_name(), Some("Bob"));
        assert_eq!(second.avatar(), Some("a.png"));
        assert!(second.messages.is_empty());

        let empty: PullResponse = serde_json::from_value(json!({"conversations": null})).unwrap();
        assert!(empty.conversations.is_empty());
    }

    #[test]
    fn test_loosely_typed_fields() {
        let message = raw(json!({
            "from_user_id": "U2",
            "content": 42,
            "created_at": 1,
            "is_read": "true",
            "is_sender": 0
        }));
        assert_eq!(message.content.as_deref(), Some("42"));
        assert_eq!(message.is_read, Some(true));
        assert_eq!(message.is_sender, Some(false));

        let odd = raw(json!({"is_read": "maybe", "is_sender": [1]}));
        assert_eq!(odd.is_read, None);
        assert_eq!(odd.is_sender, None);
    }

    #[test]
    fn test_undecodable_entries_are_counted() {
        let response: PullResponse = serde_json::from_value(json!({
            "conversations": [
                {"conversation_id": "private:U2", "is_pinned": 1, "messages": [
                    {"from_user_id": "U2", "content": "ok", "created_at": 1},
                    "not a message",
                    {"from_user_id": "U2", "content": {"rich": true}, "created_at": 2}
                ]},
                {"conversation_id": "group:G1", "messages": {"oops": 1}},
                17
            ]
        }))
        .unwrap();

        assert_eq!(response.conversations.len(), 2);
        assert_eq!(response.conversations.rejected(), 1);

        let first = &response.conversations[0];
        assert_eq!(first.is_pinned, Some(true));
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages.rejected(), 1);
        // undecodable content surfaces later as a missing field
        assert!(first.messages[1].content.is_none());

        assert!(response.conversations[1].messages.is_empty());
        assert_eq!(response.conversations[1].messages.rejected(), 1);
    }

    #[test]
    fn test_envelope_check() {
        let ok: Envelope = serde_json::from_value(json!({"code": 200})).unwrap();
        assert!(ok.check().is_ok());
        assert!(Envelope::default().check().is_ok());

        let auth: Envelope = serde_json::from_value(json!({"code": 1003, "message": "token expired"})).unwrap();
        assert!(auth.check().unwrap_err().is_auth());

        let failed: Envelope = serde_json::from_value(json!({"code": 500, "message": "boom"})).unwrap();
        assert!(matches!(failed.check(), Err(crate::SyncError::Server { code: 500, .. })));

        let error_field: Envelope = serde_json::from_value(json!({"error": "nope"})).unwrap();
        assert!(error_field.check().is_err());
    }
}
