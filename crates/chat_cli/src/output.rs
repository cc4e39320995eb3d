//! Human and JSON renderings of sync state

use chat_common::{Conversation, StreamToken};
use chat_sync::{PullSummary, Snapshot, SyncConfig};
use serde_json::{json, Value};

const PREVIEW_CHARS: usize = 40;

fn format_time(millis: i64) -> String {
    if millis == 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

fn conversation_json(conversation: &Conversation) -> Value {
    json!({
        "id": conversation.id.to_string(),
        "name": conversation.peer_display_name,
        "unread": conversation.unread_count,
        "pinned": conversation.is_pinned,
        "last_message": conversation.last_message_preview,
        "last_message_time": conversation.last_message_time,
    })
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Conversation list, pinned first
pub fn conversations(list: &[Conversation], total_unread: u32, json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<Value> = list.iter().map(conversation_json).collect();
        return print_json(&json!({
            "total_unread": total_unread,
            "conversations": entries,
        }));
    }

    if list.is_empty() {
        println!("No conversations");
        return Ok(());
    }

    for conversation in list {
        let marker = if conversation.is_pinned { "*" } else { " " };
        let unread = match conversation.unread_count {
            0 => String::new(),
            n => format!(" ({} unread)", n),
        };
        println!(
            "{} {:<24} {:<16} {}{}  {}",
            marker,
            conversation.id.to_string(),
            conversation.peer_display_name,
            format_time(conversation.last_message_time),
            unread,
            preview(&conversation.last_message_preview)
        );
    }
    println!("Total unread: {}", total_unread);
    Ok(())
}

pub fn pull(
    summary: &PullSummary,
    list: &[Conversation],
    total_unread: u32,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        let entries: Vec<Value> = list.iter().map(conversation_json).collect();
        return print_json(&json!({
            "pulled_conversations": summary.conversations,
            "new_messages": summary.inserted,
            "merged_messages": summary.updated,
            "rejected": summary.rejected,
            "cursor": summary.cursor.to_string(),
            "total_unread": total_unread,
            "conversations": entries,
        }));
    }

    eprintln!(
        "✓ Pulled {} conversations: {} new, {} merged (cursor {})",
        summary.conversations, summary.inserted, summary.updated, summary.cursor
    );
    if summary.rejected > 0 {
        eprintln!("  {} malformed entries skipped", summary.rejected);
    }
    conversations(list, total_unread, false)
}

pub fn status(
    config: &SyncConfig,
    cursor: StreamToken,
    snapshot: &Snapshot,
    json: bool,
) -> anyhow::Result<()> {
    let total_unread: u32 = snapshot.conversations.iter().map(|c| c.unread_count).sum();
    let messages: usize = snapshot.messages.iter().map(|(_, list)| list.len()).sum();

    if json {
        return print_json(&json!({
            "user_id": config.user_id,
            "api_base": config.api_base,
            "ws_url": config.ws_url,
            "state_dir": config.state_dir(),
            "cursor": cursor.to_string(),
            "conversations": snapshot.conversations.len(),
            "messages": messages,
            "total_unread": total_unread,
        }));
    }

    println!("User:          {}", config.user_id);
    println!("API:           {}", config.api_base);
    println!("Push feed:     {}", config.ws_url);
    println!("State:         {}", config.state_dir().display());
    println!("Cursor:        {}", cursor);
    println!(
        "Snapshot:      {} conversations, {} messages, {} unread",
        snapshot.conversations.len(),
        messages,
        total_unread
    );
    Ok(())
}
