//! Conversation list
//!
//! Order: pinned conversations first (stable among themselves), then most
//! recent activity. A push moves its conversation to the front of its pin
//! partition.

use chat_common::{Conversation, ConversationId};
use std::cmp::Reverse;

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    entries: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversations in display order
    pub fn entries(&self) -> &[Conversation] {
        &self.entries
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.entries.iter().find(|c| &c.id == id)
    }

    pub fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.entries.iter_mut().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Return the entry for `id`, creating it with `make` if absent.
    /// The flag is true when the entry was created.
    pub fn get_or_insert_with(
        &mut self,
        id: &ConversationId,
        make: impl FnOnce() -> Conversation,
    ) -> (&mut Conversation, bool) {
        match self.entries.iter().position(|c| &c.id == id) {
            Some(index) => (&mut self.entries[index], false),
            None => {
                let conversation = make();
                debug_assert_eq!(&conversation.id, id);
                self.entries.insert(0, conversation);
                self.partition_pinned();
                let index = self
                    .entries
                    .iter()
                    .position(|c| &c.id == id)
                    .unwrap_or(0);
                (&mut self.entries[index], true)
            }
        }
    }

    /// Move to the front of its pin partition
    pub fn promote(&mut self, id: &ConversationId) {
        if let Some(index) = self.entries.iter().position(|c| &c.id == id) {
            let conversation = self.entries.remove(index);
            self.entries.insert(0, conversation);
            self.partition_pinned();
        }
    }

    /// Full re-sort: pinned first, then `last_message_time` descending
    pub fn resort(&mut self) {
        self.entries
            .sort_by_key(|c| (!c.is_pinned, Reverse(c.last_message_time)));
    }

    /// Returns false if `id` is unknown
    pub fn set_pinned(&mut self, id: &ConversationId, pinned: bool) -> bool {
        match self.get_mut(id) {
            Some(conversation) => {
                conversation.is_pinned = pinned;
                self.resort();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let index = self.entries.iter().position(|c| &c.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Sum of per-conversation unread counts
    pub fn total_unread(&self) -> u32 {
        self.entries.iter().map(|c| c.unread_count).sum()
    }

    /// Replace all entries (snapshot restore). Later duplicates are dropped.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.entries.clear();
        for conversation in conversations {
            if !self.contains(&conversation.id) {
                self.entries.push(conversation);
            }
        }
        self.resort();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn partition_pinned(&mut self) {
        // stable: relative order inside each partition is preserved
        self.entries.sort_by_key(|c| !c.is_pinned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(peer: &str) -> ConversationId {
        ConversationId::private(peer).unwrap()
    }

    fn conv(peer: &str, time: i64, pinned: bool) -> Conversation {
        let mut c = Conversation::new(id(peer), peer);
        c.last_message_time = time;
        c.is_pinned = pinned;
        c
    }

    fn order(directory: &ConversationDirectory) -> Vec<String> {
        directory
            .entries()
            .iter()
            .map(|c| c.id.peer_id().to_string())
            .collect()
    }

    #[test]
    fn test_pinned_first_then_recent() {
        let mut directory = ConversationDirectory::new();
        directory.replace_all(vec![
            conv("a", 100, false),
            conv("b", 300, false),
            conv("c", 50, true),
            conv("d", 200, true),
        ]);
        assert_eq!(order(&directory), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_promote_stays_below_pinned() {
        let mut directory = ConversationDirectory::new();
        directory.replace_all(vec![
            conv("pinned", 1, true),
            conv("x", 300, false),
            conv("y", 200, false),
        ]);

        directory.promote(&id("y"));
        assert_eq!(order(&directory), vec!["pinned", "y", "x"]);
    }

    #[test]
    fn test_insert_creates_once() {
        let mut directory = ConversationDirectory::new();
        let (_, created) = directory.get_or_insert_with(&id("a"), || conv("a", 0, false));
        assert!(created);
        let (entry, created) = directory.get_or_insert_with(&id("a"), || conv("a", 9, false));
        assert!(!created);
        assert_eq!(entry.last_message_time, 0);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_set_pinned_reorders() {
        let mut directory = ConversationDirectory::new();
        directory.replace_all(vec![conv("a", 300, false), conv("b", 100, false)]);

        assert!(directory.set_pinned(&id("b"), true));
        assert_eq!(order(&directory), vec!["b", "a"]);
        assert!(!directory.set_pinned(&id("zzz"), true));
    }

    #[test]
    fn test_total_unread_and_remove() {
        let mut directory = ConversationDirectory::new();
        let mut a = conv("a", 1, false);
        a.unread_count = 2;
        let mut b = conv("b", 2, false);
        b.unread_count = 3;
        directory.replace_all(vec![a, b]);
        assert_eq!(directory.total_unread(), 5);

        directory.remove(&id("b"));
        assert_eq!(directory.total_unread(), 2);
        assert!(directory.remove(&id("b")).is_none());
    }
}
