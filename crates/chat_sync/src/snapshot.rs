//! Durable mirror of the directory and message cache
//!
//! Lets a restarted client show its conversations before the first pull
//! completes. Writes are debounced by the owner: mutations only mark the
//! store dirty and `save_if_dirty` is called on a timer.

use chat_common::{Conversation, ConversationId, Message};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "snapshot.bin";

/// Serialized client state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<(ConversationId, Vec<Message>)>,
    /// Epoch milliseconds
    pub saved_at: i64,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty() && self.messages.is_empty()
    }
}

/// Manages the snapshot file
pub struct SnapshotStore {
    /// `None` when snapshots are disabled
    path: Option<PathBuf>,

    dirty: bool,
}

impl SnapshotStore {
    pub fn new(state_dir: &Path, enabled: bool) -> Self {
        Self {
            path: enabled.then(|| state_dir.join(SNAPSHOT_FILE)),
            dirty: false,
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            dirty: false,
        }
    }

    pub fn mark_dirty(&mut self) {
        if self.path.is_some() {
            self.dirty = true;
        }
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load the snapshot. Missing, unreadable or corrupt files yield an empty
    /// snapshot; corrupt files are removed.
    pub fn load(&self) -> Snapshot {
        let Some(path) = &self.path else {
            return Snapshot::default();
        };

        if !path.exists() {
            tracing::debug!("No snapshot found, starting fresh");
            return Snapshot::default();
        }

        match fs::read(path) {
            Ok(data) => match bincode::deserialize::<Snapshot>(&data) {
                Ok(snapshot) => {
                    tracing::info!(
                        "Loaded snapshot with {} conversations",
                        snapshot.conversations.len()
                    );
                    snapshot
                }
                Err(e) => {
                    tracing::warn!("Failed to deserialize snapshot: {}", e);
                    tracing::info!("Snapshot corruption detected, discarding");
                    let _ = fs::remove_file(path);
                    Snapshot::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read snapshot file: {}", e);
                Snapshot::default()
            }
        }
    }

    /// Write `snapshot` to disk (temp file + rename)
    pub fn save(&mut self, snapshot: &Snapshot) -> crate::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = bincode::serialize(snapshot)?;
        let storage =
            |e: std::io::Error| crate::SyncError::Storage(format!("snapshot {:?}: {}", path, e));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).map_err(storage)?;
        fs::rename(&tmp, path).map_err(storage)?;

        self.dirty = false;
        tracing::debug!(
            "Saved snapshot: {} conversations, {} message lists",
            snapshot.conversations.len(),
            snapshot.messages.len()
        );
        Ok(())
    }

    /// Save only if something changed since the last save.
    /// `build` is not called when the store is clean.
    pub fn save_if_dirty(&mut self, build: impl FnOnce() -> Snapshot) -> crate::Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let snapshot = build();
        self.save(&snapshot)?;
        Ok(true)
    }

    /// Remove the snapshot file
    pub fn clear(&mut self) -> crate::Result<()> {
        self.dirty = false;
        if let Some(path) = &self.path {
            if path.exists() {
                fs::remove_file(path)?;
                tracing::info!("Cleared snapshot");
            }
        }
        Ok(())
    }
}
