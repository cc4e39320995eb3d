//! Wire payload builders
//!
//! Produce the JSON shapes the server sends so tests exercise the same
//! normalization path as production.

use chat_common::ConversationId;
use chat_sync::PullResponse;
use serde_json::{json, Value};

/// Base timestamp used by fixtures (epoch seconds)
pub const T0: i64 = 1_700_000_000;

/// A private message as the server emits it
pub fn private_message(
    id: &str,
    from: &str,
    to: &str,
    content: &str,
    created_at: i64,
    stream_id: Option<&str>,
) -> Value {
    let mut message = json!({
        "id": id,
        "type": "private",
        "from_user_id": from,
        "to_user_id": to,
        "content": content,
        "created_at": created_at,
    });
    if let Some(stream_id) = stream_id {
        message["stream_id"] = json!(stream_id);
    }
    message
}

/// A group message as the server emits it
pub fn group_message(
    id: &str,
    from: &str,
    group_id: &str,
    content: &str,
    created_at: i64,
    stream_id: Option<&str>,
) -> Value {
    let mut message = json!({
        "id": id,
        "type": "group",
        "from_user_id": from,
        "group_id": group_id,
        "content": content,
        "created_at": created_at,
    });
    if let Some(stream_id) = stream_id {
        message["stream_id"] = json!(stream_id);
    }
    message
}

/// Serialize for [`chat_sync::SyncEngine::handle_push`]
pub fn push(message: &Value) -> String {
    message.to_string()
}

/// One conversation entry of a pull response. Server unread counters are
/// included (and must be ignored by the client).
pub fn conversation(conversation_id: &str, peer_name: &str, messages: Vec<Value>) -> Value {
    let id: ConversationId = conversation_id
        .parse()
        .expect("fixture conversation id must be valid");
    json!({
        "conversation_id": conversation_id,
        "type": id.kind().as_str(),
        "peer_id": id.peer_id(),
        "peer_name": peer_name,
        "unread_count": 99,
        "messages": messages,
    })
}

/// A full pull response body
pub fn pull_response(conversations: Vec<Value>) -> PullResponse {
    serde_json::from_value(json!({
        "code": 0,
        "message": "ok",
        "total_unread": 99,
        "conversations": conversations,
    }))
    .expect("fixture pull response must deserialize")
}

/// Stream token string `"<T0 millis + offset>-<seq>"`
pub fn token(offset: i64, seq: u64) -> String {
    format!("{}-{}", T0 * 1000 + offset, seq)
}
