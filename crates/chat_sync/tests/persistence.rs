//! Cursor and snapshot durability across engine instances

use assert_fs::prelude::*;
use assert_fs::TempDir;
use chat_common::{ConversationId, StreamToken};
use chat_sync::{CursorStore, SyncConfig, SyncEngine};
use chat_test_helpers::prelude::*;

fn config(temp: &TempDir) -> SyncConfig {
    SyncConfig {
        user_id: "U1".to_string(),
        data_dir: temp.path().to_path_buf(),
        ..Default::default()
    }
}

fn conv(id: &str) -> ConversationId {
    id.parse().unwrap()
}

#[tokio::test]
async fn test_restore_after_persist() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);

    let mut engine = SyncEngine::new(&config, MockApi::new("U1"));
    assert_eq!(engine.restore(), StreamToken::ZERO);
    engine
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(10, 0)))))
        .unwrap();
    engine
        .handle_push(&push(&group_message("g1", "U3", "G1", "yo", T0 + 1, Some(&token(20, 0)))))
        .unwrap();
    engine.set_pinned(&conv("private:U2"), true).await.unwrap();
    engine.flush_reports().await;
    engine.persist().unwrap();

    temp.child("U1/cursor").assert(predicates::path::exists());
    temp.child("U1/snapshot.bin").assert(predicates::path::exists());

    let mut reloaded = SyncEngine::new(&config, MockApi::new("U1"));
    let cursor = reloaded.restore();

    assert_eq!(cursor, token(20, 0).parse().unwrap());
    assert_eq!(reloaded.cursor(), cursor);
    assert_eq!(reloaded.conversations(), engine.conversations());
    assert_eq!(reloaded.messages(&conv("group:G1")), engine.messages(&conv("group:G1")));
    assert_eq!(reloaded.total_unread(), 2);
    assert_pinned_first(reloaded.conversations());
}

#[tokio::test]
async fn test_persist_without_changes_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let mut engine = SyncEngine::new(&config(&temp), MockApi::new("U1"));
    engine.restore();

    engine.persist().unwrap();

    temp.child("U1/cursor").assert(predicates::path::missing());
    temp.child("U1/snapshot.bin").assert(predicates::path::missing());
}

#[tokio::test]
async fn test_logout_keeps_durable_state() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let mut engine = SyncEngine::new(&config, MockApi::new("U1"));
    engine
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(10, 0)))))
        .unwrap();
    engine.flush_reports().await;
    engine.persist().unwrap();

    engine.logout();
    // nothing dirty after logout
    engine.persist().unwrap();

    assert!(engine.conversations().is_empty());
    let mut reloaded = SyncEngine::new(&config, MockApi::new("U1"));
    reloaded.restore();
    assert_eq!(reloaded.conversations().len(), 1);
    assert_eq!(reloaded.cursor(), token(10, 0).parse().unwrap());
}

#[tokio::test]
async fn test_clear_durable_resets_next_session() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let mut engine = SyncEngine::new(&config, MockApi::new("U1"));
    engine
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(10, 0)))))
        .unwrap();
    engine.flush_reports().await;
    engine.persist().unwrap();

    engine.clear_durable().unwrap();

    temp.child("U1/snapshot.bin").assert(predicates::path::missing());
    assert_eq!(CursorStore::open(&config.state_dir()).load(), StreamToken::ZERO);
    let mut reloaded = SyncEngine::new(&config, MockApi::new("U1"));
    assert_eq!(reloaded.restore(), StreamToken::ZERO);
    assert!(reloaded.conversations().is_empty());
}

#[tokio::test]
async fn test_snapshot_disabled_restores_cursor_only() {
    let temp = TempDir::new().unwrap();
    let config = SyncConfig {
        snapshot_enabled: false,
        ..config(&temp)
    };
    let mut engine = SyncEngine::new(&config, MockApi::new("U1"));
    engine
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(10, 0)))))
        .unwrap();
    engine.flush_reports().await;
    engine.persist().unwrap();

    let mut reloaded = SyncEngine::new(&config, MockApi::new("U1"));
    assert_eq!(reloaded.restore(), token(10, 0).parse().unwrap());
    assert!(reloaded.conversations().is_empty());
}

#[tokio::test]
async fn test_users_do_not_share_state() {
    let temp = TempDir::new().unwrap();
    let mut engine = SyncEngine::new(&config(&temp), MockApi::new("U1"));
    engine
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(10, 0)))))
        .unwrap();
    engine.flush_reports().await;
    engine.persist().unwrap();

    let other = SyncConfig {
        user_id: "U2".to_string(),
        ..config(&temp)
    };
    let mut engine = SyncEngine::new(&other, MockApi::new("U2"));
    assert_eq!(engine.restore(), StreamToken::ZERO);
    assert!(engine.conversations().is_empty());
}
