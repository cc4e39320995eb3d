//! Workspace initialization utilities for tests
//!
//! A ChatIM workspace is any directory holding `.chatim/config.toml`; durable
//! sync state lands under `.chatim/state/<user>/`.

use assert_fs::TempDir;
use std::fs;
use std::path::PathBuf;

/// Create a temporary directory for testing
///
/// The directory will be automatically cleaned up when the `TempDir` is dropped.
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Initialize a workspace whose config names `user_id` as the local user
///
/// # Example
///
/// ```rust
/// use chat_test_helpers::workspace::init_workspace;
///
/// let workspace = init_workspace("U1");
/// assert!(workspace.path().join(".chatim/config.toml").exists());
/// ```
pub fn init_workspace(user_id: &str) -> TempDir {
    workspace_with_config(&format!("[session]\nuser_id = \"{}\"\n", user_id))
}

/// Initialize a workspace with a literal `config.toml`
pub fn workspace_with_config(config_toml: &str) -> TempDir {
    let temp = temp_dir();
    let dir = temp.path().join(".chatim");
    fs::create_dir_all(&dir).expect("Failed to create .chatim directory");
    fs::write(dir.join("config.toml"), config_toml).expect("Failed to write config.toml");
    temp
}

/// Per-user state directory inside a workspace (default `data_dir`)
pub fn state_dir(workspace: &TempDir, user_id: &str) -> PathBuf {
    workspace.path().join(".chatim").join("state").join(user_id)
}
