//! `status` and `reset` against persisted state

use assert_fs::prelude::*;
use chat_test_helpers::prelude::*;
use predicates::prelude::*;

#[test]
fn test_status_fresh_workspace() {
    let workspace = init_workspace("U1");

    chatim_command()
        .current_dir(workspace.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("User:          U1"))
        .stdout(predicate::str::contains("Cursor:        0-0"))
        .stdout(predicate::str::contains("0 conversations"));
}

#[test]
fn test_status_reads_persisted_cursor() {
    let workspace = init_workspace("U1");
    workspace
        .child(".chatim/state/U1/cursor")
        .write_str("1700000000000-1")
        .unwrap();

    let output = chatim_command()
        .current_dir(workspace.path())
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["cursor"], "1700000000000-1");
    assert_eq!(status["user_id"], "U1");
    assert_eq!(status["total_unread"], 0);
}

#[test]
fn test_status_corrupt_cursor_falls_back_to_sentinel() {
    let workspace = init_workspace("U1");
    workspace
        .child(".chatim/state/U1/cursor")
        .write_str("garbage")
        .unwrap();

    chatim_command()
        .current_dir(workspace.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cursor:        0-0"));
}

#[test]
fn test_status_env_user_override() {
    let workspace = workspace_with_config("[session]\nuser_id = \"\"\n");

    chatim_command()
        .current_dir(workspace.path())
        .env("CHATIM_USER", "U5")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("U5"));
}

#[test]
fn test_status_without_user_is_config_error() {
    let workspace = workspace_with_config("[session]\nuser_id = \"\"\n");

    chatim_command()
        .current_dir(workspace.path())
        .arg("status")
        .assert()
        .code(101)
        .stderr(predicate::str::contains("user_id"));
}

#[test]
fn test_malformed_config_is_config_error() {
    let workspace = workspace_with_config("[server\napi_base = ");

    chatim_command()
        .current_dir(workspace.path())
        .arg("status")
        .assert()
        .code(101)
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn test_reset_clears_durable_state() {
    let workspace = init_workspace("U1");
    let cursor = workspace.child(".chatim/state/U1/cursor");
    let snapshot = workspace.child(".chatim/state/U1/snapshot.bin");
    cursor.write_str("5-0").unwrap();
    snapshot.write_binary(&[1, 2, 3]).unwrap();

    chatim_command()
        .current_dir(workspace.path())
        .arg("reset")
        .assert()
        .success()
        .stderr(predicate::str::contains("Cleared sync state for U1"));

    cursor.assert(predicate::path::missing());
    snapshot.assert(predicate::path::missing());
    assert!(state_dir(&workspace, "U1").exists());
}

#[test]
fn test_reset_is_idempotent() {
    let workspace = init_workspace("U1");

    for _ in 0..2 {
        chatim_command()
            .current_dir(workspace.path())
            .arg("reset")
            .assert()
            .success();
    }
}
