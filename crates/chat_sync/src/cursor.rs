//! Monotonic delivery cursor

use crate::{Result, SyncError};
use chat_common::StreamToken;
use std::fs;
use std::path::{Path, PathBuf};

const CURSOR_FILE: &str = "cursor";

/// Last acknowledged stream position.
///
/// `set` only ever moves forward; `load` falls back to the beginning of the
/// stream when the record is missing or unreadable.
#[derive(Debug)]
pub struct CursorStore {
    current: StreamToken,
    path: Option<PathBuf>,
    dirty: bool,
}

impl CursorStore {
    /// Cursor backed by `<state_dir>/cursor`
    pub fn open(state_dir: &Path) -> Self {
        Self {
            current: StreamToken::ZERO,
            path: Some(state_dir.join(CURSOR_FILE)),
            dirty: false,
        }
    }

    /// Cursor without durable storage
    pub fn in_memory() -> Self {
        Self {
            current: StreamToken::ZERO,
            path: None,
            dirty: false,
        }
    }

    pub fn get(&self) -> StreamToken {
        self.current
    }

    /// Advance to `token`. Returns false (no-op) unless `token > current`.
    pub fn set(&mut self, token: StreamToken) -> bool {
        if token <= self.current {
            return false;
        }
        self.current = token;
        self.dirty = true;
        true
    }

    /// Back to the sentinel (logout)
    pub fn reset(&mut self) {
        self.current = StreamToken::ZERO;
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read the persisted cursor. Never fails: missing or corrupt records
    /// yield the sentinel.
    pub fn load(&mut self) -> StreamToken {
        let Some(path) = &self.path else {
            return self.current;
        };

        match fs::read_to_string(path) {
            Ok(content) => match content.parse::<StreamToken>() {
                Ok(token) => {
                    tracing::debug!("Loaded cursor {}", token);
                    if token > self.current {
                        self.current = token;
                    }
                }
                Err(e) => {
                    tracing::warn!("Ignoring corrupt cursor record {:?}: {}", path, e);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No cursor record, starting from {}", StreamToken::ZERO);
            }
            Err(e) => {
                tracing::warn!("Failed to read cursor record {:?}: {}", path, e);
            }
        }
        self.current
    }

    /// Persist the cursor (write to a temp file, then rename)
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };

        let storage = |e: std::io::Error| SyncError::Storage(format!("cursor {:?}: {}", path, e));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.current.to_string()).map_err(storage)?;
        fs::rename(&tmp, path).map_err(storage)?;

        self.dirty = false;
        tracing::debug!("Saved cursor {}", self.current);
        Ok(())
    }

    /// Delete the persisted record
    pub fn clear_durable(&mut self) -> Result<()> {
        self.reset();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::Storage(e.to_string())),
            }
        }
        Ok(())
    }
}
