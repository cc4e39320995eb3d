//! Per-conversation message cache
//!
//! Each conversation's list is kept sorted by `created_at`, then stream token,
//! and never holds two entries that the dedup rule considers the same message.

use chat_common::{ConversationId, Message};
use std::collections::HashMap;

/// Result of inserting one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New entry appended
    Inserted,
    /// Matched an existing entry; incoming fields applied
    Updated,
}

/// Dedup rule: stream token if both carry one, else server id if both carry
/// one, else `(sender, created_at, content)`.
///
/// The composite fallback can collide for genuinely distinct messages with the
/// same sender, timestamp and text; that is accepted.
pub fn is_same_message(a: &Message, b: &Message) -> bool {
    if let (Some(x), Some(y)) = (&a.stream_token, &b.stream_token) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (&a.id, &b.id) {
        return x == y;
    }
    a.sender_id == b.sender_id && a.created_at == b.created_at && a.content == b.content
}

/// Apply `incoming` over `existing`. Optional fields the incoming copy lacks
/// keep their current value, so a pulled entry without an id picks the id up
/// from a later push and vice versa.
fn merge_into(existing: &mut Message, incoming: Message) {
    if incoming.id.is_some() {
        existing.id = incoming.id;
    }
    if incoming.stream_token.is_some() {
        existing.stream_token = incoming.stream_token;
    }
    if incoming.sender_display_name.is_some() {
        existing.sender_display_name = incoming.sender_display_name;
    }
    existing.conversation_id = incoming.conversation_id;
    existing.sender_id = incoming.sender_id;
    existing.content = incoming.content;
    existing.created_at = incoming.created_at;
    existing.kind = incoming.kind;
    existing.is_self = existing.is_self || incoming.is_self;
    existing.is_read = existing.is_read || incoming.is_read;
}

/// In-memory message store keyed by conversation
#[derive(Debug, Default)]
pub struct MessageCache {
    lists: HashMap<ConversationId, Vec<Message>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of one conversation in display order
    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.lists.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Newest message of a conversation
    pub fn last(&self, id: &ConversationId) -> Option<&Message> {
        self.lists.get(id).and_then(|list| list.last())
    }

    /// Insert or merge one message into its conversation
    pub fn insert(&mut self, message: Message) -> MergeOutcome {
        let list = self.lists.entry(message.conversation_id.clone()).or_default();

        if let Some(index) = list.iter().position(|m| is_same_message(m, &message)) {
            let mut existing = list.remove(index);
            merge_into(&mut existing, message);
            insert_sorted(list, existing);
            MergeOutcome::Updated
        } else {
            insert_sorted(list, message);
            MergeOutcome::Inserted
        }
    }

    /// Mutable access for status flips (e.g. read receipts)
    pub fn messages_mut(&mut self, id: &ConversationId) -> Option<&mut Vec<Message>> {
        self.lists.get_mut(id)
    }

    /// Make sure a (possibly empty) list exists for `id`
    pub fn ensure(&mut self, id: &ConversationId) {
        self.lists.entry(id.clone()).or_default();
    }

    pub fn remove(&mut self, id: &ConversationId) -> Option<Vec<Message>> {
        self.lists.remove(id)
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }

    pub fn conversation_count(&self) -> usize {
        self.lists.len()
    }

    pub fn message_count(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConversationId, &Vec<Message>)> {
        self.lists.iter()
    }
}

fn insert_sorted(list: &mut Vec<Message>, message: Message) {
    let key = message.order_key();
    let index = list.partition_point(|m| m.order_key() <= key);
    list.insert(index, message);
}
