//! CLI command builders for tests
//!
//! Provides pre-configured command builders with clean environments
//! to prevent log pollution and ensure consistent test execution.

use assert_cmd::Command;

/// Get a Command for the `chatim` binary with clean environment
///
/// This command is pre-configured with:
/// - `RUST_LOG=error` to suppress INFO/DEBUG logs in tests
/// - No inherited credential or user override
///
/// # Example
///
/// ```rust,no_run
/// use chat_test_helpers::cli::chatim_command;
///
/// chatim_command()
///     .arg("--version")
///     .assert()
///     .success();
/// ```
pub fn chatim_command() -> Command {
    command_for("chatim")
}

/// Get a Command for a specific binary with clean environment
#[allow(deprecated)]
pub fn command_for(bin_name: &str) -> Command {
    let mut cmd = Command::cargo_bin(bin_name)
        .unwrap_or_else(|_| panic!("Failed to find {} binary", bin_name));
    cmd.env("RUST_LOG", "error");
    cmd.env_remove("CHATIM_TOKEN");
    cmd.env_remove("CHATIM_USER");
    cmd
}
