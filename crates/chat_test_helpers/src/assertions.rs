//! Domain-specific assertions for ChatIM tests
//!
//! Provides custom predicates and assertion helpers for the properties the
//! sync engine must keep.

use chat_common::{Conversation, Message};
use predicates::prelude::*;

/// Assert that stderr does NOT contain any of the given strings
///
/// # Example
///
/// ```rust
/// use chat_test_helpers::assertions::stderr_not_contains;
/// use predicates::prelude::*;
///
/// assert!(stderr_not_contains(&["ERROR", "WARN"]).eval("all quiet"));
/// ```
pub fn stderr_not_contains(values: &[&str]) -> impl Predicate<str> {
    let owned_values: Vec<String> = values.iter().map(|&s| s.to_string()).collect();
    predicate::function(move |s: &str| !owned_values.iter().any(|v| s.contains(v.as_str())))
}

/// Assert a conversation's messages are ordered by `created_at`, then stream
/// token
pub fn assert_sorted(messages: &[Message]) {
    for pair in messages.windows(2) {
        assert!(
            pair[0].order_key() <= pair[1].order_key(),
            "messages out of order: {:?} before {:?}",
            pair[0].order_key(),
            pair[1].order_key()
        );
    }
}

/// Assert the reported total equals the sum of per-conversation counts
pub fn assert_unread_conserved(conversations: &[Conversation], total: u32) {
    let sum: u32 = conversations.iter().map(|c| c.unread_count).sum();
    assert_eq!(sum, total, "total unread must equal the per-conversation sum");
}

/// Assert pinned conversations precede unpinned ones
pub fn assert_pinned_first(conversations: &[Conversation]) {
    let first_unpinned = conversations
        .iter()
        .position(|c| !c.is_pinned)
        .unwrap_or(conversations.len());
    assert!(
        conversations[first_unpinned..].iter().all(|c| !c.is_pinned),
        "pinned conversation found after an unpinned one"
    );
}
