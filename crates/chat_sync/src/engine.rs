//! Sync engine orchestration
//!
//! Reconciles the push feed with the pull feed. Every mutation of the cache,
//! the directory and the cursor goes through [`SyncEngine`]; callers drive it
//! from a single task (see [`crate::Session`]) so handlers never interleave.

use crate::api::ChatApi;
use crate::cache::{MergeOutcome, MessageCache};
use crate::config::SyncConfig;
use crate::connection::ConnectionState;
use crate::cursor::CursorStore;
use crate::directory::ConversationDirectory;
use crate::protocol::RawMessage;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::{Result, SyncError};
use chat_common::{
    time, Conversation, ConversationId, ConversationKind, Message, StreamToken,
};
use std::sync::Arc;
use tokio::task::JoinSet;

/// What a push event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub conversation_id: ConversationId,
    pub merge: MergeOutcome,
    /// The directory had no entry for the conversation
    pub created_conversation: bool,
    pub cursor_advanced: bool,
}

/// What a pull did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub conversations: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Conversations or messages that could not be normalized
    pub rejected: usize,
    pub cursor: StreamToken,
    pub cursor_advanced: bool,
}

/// Unread rule shared by both feeds
fn counts_as_unread(message: &Message, selected: bool) -> bool {
    !message.is_self && !message.is_read && !selected
}

/// Directory entry synthesized from the first message of an unknown
/// conversation
fn conversation_for(message: &Message) -> Conversation {
    let id = message.conversation_id.clone();
    let name = match message.kind {
        ConversationKind::Private if !message.is_self => message
            .sender_display_name
            .clone()
            .unwrap_or_else(|| id.peer_id().to_string()),
        _ => id.peer_id().to_string(),
    };
    Conversation::new(id, name)
}

fn refresh_preview(conversation: &mut Conversation, last: Option<&Message>) {
    if let Some(last) = last {
        conversation.last_message_preview = last.content.clone();
        conversation.last_message_time = last.created_at;
    }
}

fn build_snapshot(directory: &ConversationDirectory, cache: &MessageCache) -> Snapshot {
    let mut messages: Vec<_> = cache
        .iter()
        .map(|(id, list)| (id.clone(), list.clone()))
        .collect();
    messages.sort_by(|a, b| a.0.cmp(&b.0));

    Snapshot {
        conversations: directory.entries().to_vec(),
        messages,
        saved_at: time::now_millis(),
    }
}

/// Main sync engine
pub struct SyncEngine<A: ChatApi> {
    user_id: String,
    api: Arc<A>,
    cache: MessageCache,
    directory: ConversationDirectory,
    cursor: CursorStore,
    snapshots: SnapshotStore,
    selected: Option<ConversationId>,
    status: ConnectionState,
    /// In-flight best-effort cursor reports
    reports: JoinSet<()>,
}

impl<A: ChatApi> SyncEngine<A> {
    /// Engine with durable state under `config.state_dir()`
    pub fn new(config: &SyncConfig, api: A) -> Self {
        let state_dir = config.state_dir();
        Self::with_stores(
            config.user_id.clone(),
            api,
            CursorStore::open(&state_dir),
            SnapshotStore::new(&state_dir, config.snapshot_enabled),
        )
    }

    /// Engine without durable state
    pub fn in_memory(user_id: impl Into<String>, api: A) -> Self {
        Self::with_stores(
            user_id.into(),
            api,
            CursorStore::in_memory(),
            SnapshotStore::disabled(),
        )
    }

    fn with_stores(
        user_id: String,
        api: A,
        cursor: CursorStore,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            user_id,
            api: Arc::new(api),
            cache: MessageCache::new(),
            directory: ConversationDirectory::new(),
            cursor,
            snapshots,
            selected: None,
            status: ConnectionState::Disconnected,
            reports: JoinSet::new(),
        }
    }


    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Conversations in display order
    pub fn conversations(&self) -> &[Conversation] {
        self.directory.entries()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.directory.get(id)
    }

    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.cache.messages(id)
    }

    /// Sum of per-conversation unread counts
    pub fn total_unread(&self) -> u32 {
        self.directory.total_unread()
    }

    pub fn cursor(&self) -> StreamToken {
        self.cursor.get()
    }

    pub fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    pub fn pending_reports(&self) -> usize {
        self.reports.len()
    }

    fn is_selected(&self, id: &ConversationId) -> bool {
        self.selected.as_ref() == Some(id)
    }


    /// Load the persisted cursor and snapshot. Returns the cursor.
    pub fn restore(&mut self) -> StreamToken {
        let token = self.cursor.load();
        let snapshot = self.snapshots.load();
        if !snapshot.is_empty() {
            self.apply_snapshot(snapshot);
        }
        tracing::info!(
            "Restored {} conversations, cursor at {}",
            self.directory.len(),
            token
        );
        token
    }

    /// Replace directory and cache with `snapshot`
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.directory.replace_all(snapshot.conversations);
        self.cache.clear();
        for (id, messages) in snapshot.messages {
            if !self.directory.contains(&id) {
                tracing::debug!("Skipping snapshot messages of unknown {}", id);
                continue;
            }
            for message in messages {
                self.cache.insert(message);
            }
        }
        self.snapshots.mark_clean();
    }

    /// Current state as a snapshot
    pub fn snapshot(&self) -> Snapshot {
        build_snapshot(&self.directory, &self.cache)
    }

    /// Write the cursor and snapshot if they changed
    pub fn persist(&mut self) -> Result<()> {
        if self.cursor.is_dirty() {
            self.cursor.save()?;
        }
        let Self {
            snapshots,
            directory,
            cache,
            ..
        } = self;
        snapshots.save_if_dirty(|| build_snapshot(&*directory, &*cache))?;
        Ok(())
    }

    /// Delete the durable cursor and snapshot
    pub fn clear_durable(&mut self) -> Result<()> {
        self.cursor.clear_durable()?;
        self.snapshots.clear()?;
        Ok(())
    }


    /// Apply one push event. A payload that cannot be normalized is a
    /// `Parse` error and leaves state untouched.
    pub fn handle_push(&mut self, payload: &str) -> Result<PushOutcome> {
        let raw = RawMessage::from_push(payload)?;
        let message = raw.normalize(&self.user_id, None)?;
        Ok(self.apply_push(message))
    }

    /// Apply an already normalized pushed message
    pub fn apply_push(&mut self, message: Message) -> PushOutcome {
        let id = message.conversation_id.clone();
        let token = message.stream_token;
        let counts = counts_as_unread(&message, self.is_selected(&id));

        let (conversation, created) = self
            .directory
            .get_or_insert_with(&id, || conversation_for(&message));
        let merge = self.cache.insert(message);

        if merge == MergeOutcome::Inserted && counts {
            conversation.unread_count += 1;
        }
        refresh_preview(conversation, self.cache.last(&id));
        self.directory.promote(&id);

        let cursor_advanced = token.map_or(false, |t| self.cursor.set(t));
        if cursor_advanced {
            self.spawn_report(self.cursor.get(), Some(id.clone()));
        }
        self.snapshots.mark_dirty();

        tracing::debug!(
            "Push into {}: {:?}{}",
            id,
            merge,
            if created { " (new conversation)" } else { "" }
        );

        PushOutcome {
            conversation_id: id,
            merge,
            created_conversation: created,
            cursor_advanced,
        }
    }

    fn spawn_report(&mut self, token: StreamToken, conversation: Option<ConversationId>) {
        let api = Arc::clone(&self.api);
        self.reports.spawn(async move {
            if let Err(e) = api.report_cursor(token, conversation).await {
                tracing::warn!("Cursor report {} failed: {}", token, e);
            }
        });
        // reap finished reports so the set does not grow unbounded
        while self.reports.try_join_next().is_some() {}
    }

    /// Wait for in-flight cursor reports
    pub async fn flush_reports(&mut self) {
        while let Some(result) = self.reports.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    tracing::warn!("Cursor report task failed: {}", e);
                }
            }
        }
    }


    /// Abort in-flight cursor reports; none reaches the server afterwards
    pub async fn abort_reports(&mut self) {
        if !self.reports.is_empty() {
            tracing::debug!("Aborting {} cursor reports", self.reports.len());
        }
        self.reports.shutdown().await;
    }

    /// Catch up from the cursor. Transport and auth failures leave state
    /// unchanged; individual malformed entries are skipped.
    pub async fn pull(&mut self, limit: u32) -> Result<PullSummary> {
        let from = self.cursor.get();
        tracing::debug!("Pulling from {} (limit {})", from, limit);
        let response = self.api.fetch_messages(from, limit).await?;

        let mut summary = PullSummary {
            conversations: 0,
            inserted: 0,
            updated: 0,
            rejected: 0,
            cursor: from,
            cursor_advanced: false,
        };
        let mut max_token = from;
        summary.rejected += response.conversations.rejected();

        for raw in response.conversations {
            let id = match raw.conversation_id() {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("Dropping pulled conversation: {}", e);
                    summary.rejected += 1;
                    continue;
                }
            };
            summary.conversations += 1;

            let (conversation, _) = self.directory.get_or_insert_with(&id, || {
                Conversation::new(id.clone(), raw.display_name().unwrap_or(id.peer_id()))
            });
            if let Some(name) = raw.display_name() {
                conversation.peer_display_name = name.to_string();
            }
            if let Some(avatar) = raw.avatar() {
                conversation.peer_avatar = Some(avatar.to_string());
            }
            if let Some(pinned) = raw.is_pinned {
                conversation.is_pinned = pinned;
            }

            let selected = self.is_selected(&id);
            let mut unread = 0;
            summary.rejected += raw.messages.rejected();
            for raw_message in raw.messages {
                let mut message = match raw_message.normalize(&self.user_id, Some(&id)) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Dropping pulled message in {}: {}", id, e);
                        summary.rejected += 1;
                        continue;
                    }
                };
                // the enclosing conversation is authoritative for pulled entries
                message.conversation_id = id.clone();

                if let Some(token) = message.stream_token {
                    max_token = max_token.max(token);
                }
                let counts = counts_as_unread(&message, selected);
                match self.cache.insert(message) {
                    MergeOutcome::Inserted => {
                        summary.inserted += 1;
                        if counts {
                            unread += 1;
                        }
                    }
                    MergeOutcome::Updated => summary.updated += 1,
                }
            }

            if let Some(conversation) = self.directory.get_mut(&id) {
                conversation.unread_count += unread;
                refresh_preview(conversation, self.cache.last(&id));
            }
        }

        self.directory.resort();
        if summary.conversations > 0 {
            self.snapshots.mark_dirty();
        }

        summary.cursor_advanced = self.cursor.set(max_token);
        summary.cursor = self.cursor.get();
        if summary.cursor_advanced {
            if let Err(e) = self.api.report_cursor(summary.cursor, None).await {
                tracing::warn!("Cursor report {} failed: {}", summary.cursor, e);
            }
        }

        tracing::info!(
            "Pull: {} conversations, {} new, {} merged, cursor {}",
            summary.conversations,
            summary.inserted,
            summary.updated,
            summary.cursor
        );
        Ok(summary)
    }


    /// Set the active conversation. Unread counts are left alone; use
    /// [`SyncEngine::mark_read`] to clear them.
    pub fn select_conversation(&mut self, id: Option<ConversationId>) {
        tracing::debug!("Selected {:?}", id.as_ref().map(ToString::to_string));
        self.selected = id;
    }

    /// Zero the unread count of `id` and send read receipts (best-effort).
    /// Returns the count that was cleared.
    pub async fn mark_read(&mut self, id: &ConversationId) -> Result<u32> {
        let conversation = self
            .directory
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        let cleared = std::mem::take(&mut conversation.unread_count);

        let mut receipts = Vec::new();
        if let Some(messages) = self.cache.messages_mut(id) {
            for message in messages.iter_mut().filter(|m| !m.is_self && !m.is_read) {
                message.is_read = true;
                if let Some(message_id) = &message.id {
                    receipts.push(message_id.clone());
                }
            }
        }
        self.snapshots.mark_dirty();

        match id.kind() {
            ConversationKind::Private => {
                for message_id in receipts {
                    if let Err(e) = self.api.mark_private_read(message_id).await {
                        tracing::warn!("Read receipt for {} failed: {}", id, e);
                    }
                }
            }
            ConversationKind::Group if !receipts.is_empty() => {
                let last_id = self
                    .cache
                    .messages(id)
                    .iter()
                    .rev()
                    .find_map(|m| m.id.clone());
                if let Some(last_id) = last_id {
                    if let Err(e) = self
                        .api
                        .mark_group_read(id.peer_id().to_string(), last_id)
                        .await
                    {
                        tracing::warn!("Read receipt for {} failed: {}", id, e);
                    }
                }
            }
            ConversationKind::Group => {}
        }

        Ok(cleared)
    }

    /// Send through the server, then append the echo as a self-authored
    /// message. Without a usable echo a local entry (no server id) is
    /// appended instead.
    pub async fn send_message(&mut self, id: &ConversationId, content: &str) -> Result<Message> {
        let response = match id.kind() {
            ConversationKind::Private => {
                self.api
                    .send_private(id.peer_id().to_string(), content.to_string())
                    .await?
            }
            ConversationKind::Group => {
                self.api
                    .send_group(id.peer_id().to_string(), content.to_string())
                    .await?
            }
        };

        let echo = response
            .msg
            .map(|raw| raw.normalize(&self.user_id, Some(id)))
            .transpose()
            .unwrap_or_else(|e| {
                tracing::warn!("Unusable send echo for {}: {}", id, e);
                None
            });

        let mut message = echo.unwrap_or_else(|| Message {
            id: None,
            stream_token: None,
            conversation_id: id.clone(),
            sender_id: self.user_id.clone(),
            sender_display_name: None,
            content: content.to_string(),
            created_at: time::now_millis(),
            kind: id.kind(),
            is_self: true,
            is_read: true,
        });
        message.conversation_id = id.clone();
        message.is_self = true;
        message.is_read = true;

        let (conversation, _) = self
            .directory
            .get_or_insert_with(id, || conversation_for(&message));
        self.cache.insert(message.clone());
        refresh_preview(conversation, self.cache.last(id));
        self.directory.promote(id);
        self.snapshots.mark_dirty();

        Ok(message)
    }

    /// Create the directory entry if absent (registering it with the server,
    /// best-effort) and select it
    pub async fn open_conversation(
        &mut self,
        kind: ConversationKind,
        peer_id: &str,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<ConversationId> {
        let id = ConversationId::new(kind, peer_id)?;

        let (_, created) = self.directory.get_or_insert_with(&id, || {
            let mut conversation = Conversation::new(id.clone(), display_name.unwrap_or(peer_id));
            conversation.peer_avatar = avatar.map(str::to_string);
            conversation.last_message_time = time::now_millis();
            conversation
        });

        if created {
            self.snapshots.mark_dirty();
            if let Err(e) = self.api.create_conversation(id.clone()).await {
                tracing::warn!("Failed to register {}: {}", id, e);
            }
        }

        self.select_conversation(Some(id.clone()));
        Ok(id)
    }

    /// Pin or unpin. The server call must succeed before local state changes.
    pub async fn set_pinned(&mut self, id: &ConversationId, pinned: bool) -> Result<()> {
        if !self.directory.contains(id) {
            return Err(SyncError::NotFound(id.clone()));
        }
        self.api.set_pinned(id.clone(), pinned).await?;
        self.directory.set_pinned(id, pinned);
        self.snapshots.mark_dirty();
        Ok(())
    }

    /// Delete a conversation and its messages. The server call must succeed
    /// before local state changes.
    pub async fn delete_conversation(&mut self, id: &ConversationId) -> Result<()> {
        if !self.directory.contains(id) {
            return Err(SyncError::NotFound(id.clone()));
        }
        self.api.delete_conversation(id.clone()).await?;

        self.directory.remove(id);
        self.cache.remove(id);
        if self.is_selected(id) {
            self.selected = None;
        }
        self.snapshots.mark_dirty();
        tracing::info!("Deleted {}", id);
        Ok(())
    }

    /// Record the connection state for readers
    pub fn observe_status(&mut self, state: ConnectionState) {
        if self.status != state {
            tracing::debug!("Connection {:?} -> {:?}", self.status, state);
            self.status = state;
        }
    }

    /// Drop all in-memory state and abort in-flight reports. Durable records
    /// are left in place (see [`SyncEngine::clear_durable`]).
    pub fn logout(&mut self) {
        self.reports.abort_all();
        self.cache.clear();
        self.directory.clear();
        self.cursor.reset();
        self.snapshots.mark_clean();
        self.selected = None;
        self.status = ConnectionState::Disconnected;
        tracing::info!("Logged out {}", self.user_id);
    }
}
