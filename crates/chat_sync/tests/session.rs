//! Session command loop

use assert_fs::prelude::*;
use assert_fs::TempDir;
use chat_common::{ConversationId, ConversationKind};
use chat_sync::{BackoffPolicy, ConnectionState, Session, SessionCommand, SessionEnd, SyncConfig};
use chat_test_helpers::prelude::*;
use std::future::pending;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

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

#[test]
fn test_invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = SyncConfig {
        user_id: String::new(),
        ..config(&temp)
    };
    assert!(Session::new(config, MockApi::new("U1")).is_err());
}

#[tokio::test]
async fn test_commands_run_in_order_until_logout() {
    init_test_logging("chat_sync=debug");
    let temp = TempDir::new().unwrap();
    let api = MockApi::new("U1");
    let mut session = Session::new(config(&temp), api.clone()).unwrap();
    let handle = session.handle();

    assert!(handle.send(SessionCommand::Open {
        kind: ConversationKind::Private,
        peer_id: "U2".to_string(),
        display_name: Some("Bob".to_string()),
    }));
    handle.send(SessionCommand::Send {
        conversation: conv("private:U2"),
        content: "hello".to_string(),
    });
    handle.send(SessionCommand::SetPinned {
        conversation: conv("private:U2"),
        pinned: true,
    });
    handle.send(SessionCommand::MarkRead(conv("private:U2")));
    handle.logout();

    let end = session.run_until(pending()).await;

    assert_eq!(end, SessionEnd::LoggedOut);
    assert_eq!(
        api.calls(),
        vec![
            ApiCall::CreateConversation(conv("private:U2")),
            ApiCall::SendPrivate {
                peer_id: "U2".to_string(),
                content: "hello".to_string(),
            },
            ApiCall::SetPinned {
                id: conv("private:U2"),
                pinned: true,
            },
        ]
    );
    assert!(session.engine().conversations().is_empty());
}

#[tokio::test]
async fn test_shutdown_persists_state() {
    let temp = TempDir::new().unwrap();
    let api = MockApi::new("U1");
    let mut session = Session::new(config(&temp), api.clone()).unwrap();
    session
        .engine_mut()
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(5, 0)))))
        .unwrap();

    let end = session.run_until(async {}).await;

    assert_eq!(end, SessionEnd::Shutdown);
    assert_eq!(session.engine().pending_reports(), 0);
    assert_eq!(api.reported_cursors(), vec![token(5, 0).parse().unwrap()]);
    temp.child("U1/cursor").assert(token(5, 0).as_str());
    temp.child("U1/snapshot.bin").assert(predicates::path::exists());
}

#[tokio::test]
async fn test_auth_failure_ends_session() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let api = MockApi::new("U1");
    api.fail_with(Some(MockFailure::Auth));
    let mut session = Session::new(config(&temp), api).unwrap();
    session.handle().send(SessionCommand::Pull);

    let end = session.run_until(pending()).await;

    match end {
        SessionEnd::AuthRejected(reason) => assert!(reason.contains("401")),
        other => panic!("unexpected end: {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_failures_keep_session_alive() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let api = MockApi::new("U1");
    api.fail_with(Some(MockFailure::Transport));
    let mut session = Session::new(config(&temp), api.clone()).unwrap();
    let handle = session.handle();

    handle.send(SessionCommand::Pull);
    handle.send(SessionCommand::Delete(conv("group:G1")));
    handle.send(SessionCommand::Send {
        conversation: conv("group:G1"),
        content: "lost".to_string(),
    });
    handle.send(SessionCommand::Select(Some(conv("group:G1"))));
    handle.logout();

    assert_eq!(session.run_until(pending()).await, SessionEnd::LoggedOut);
    // delete of an unknown conversation never reaches the server
    assert_eq!(api.calls().len(), 2);
}

#[tokio::test]
async fn test_handle_outlives_session() {
    let temp = TempDir::new().unwrap();
    let session = Session::new(config(&temp), MockApi::new("U1")).unwrap();
    let handle = session.handle();

    drop(session);

    assert!(!handle.send(SessionCommand::Pull));
}

/// Session whose push feed points at `ws_url` and gives up after one retry
fn connecting_session(temp: &TempDir, ws_url: String, api: MockApi) -> Session<MockApi> {
    let config = SyncConfig {
        ws_url,
        reconnect: BackoffPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 1,
        },
        ..config(temp)
    };
    Session::new(config, api).unwrap()
}

#[tokio::test]
async fn test_unreachable_push_feed_gives_up() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    // reserve a port, then close it so connects are refused
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut session =
        connecting_session(&temp, format!("ws://127.0.0.1:{}/ws", port), MockApi::new("U1"));

    session.start("secret").unwrap();
    let end = tokio::time::timeout(Duration::from_secs(10), session.run_until(pending()))
        .await
        .unwrap();

    assert_eq!(end, SessionEnd::GaveUp { attempts: 1 });
    assert_eq!(session.engine().status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_rejected_handshake_ends_session() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
    });
    let mut session =
        connecting_session(&temp, format!("ws://127.0.0.1:{}/ws", port), MockApi::new("U1"));

    session.start("expired").unwrap();
    let end = tokio::time::timeout(Duration::from_secs(10), session.run_until(pending()))
        .await
        .unwrap();

    match end {
        SessionEnd::AuthRejected(reason) => assert!(reason.contains("401")),
        other => panic!("unexpected end: {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_end_cancels_pending_cursor_reports() {
    suppress_logs();
    let temp = TempDir::new().unwrap();
    let api = MockApi::new("U1");
    let mut session = Session::new(config(&temp), api.clone()).unwrap();
    session
        .engine_mut()
        .handle_push(&push(&private_message("m1", "U2", "U1", "hi", T0, Some(&token(5, 0)))))
        .unwrap();
    api.fail_with(Some(MockFailure::Auth));
    session.handle().send(SessionCommand::Pull);

    let end = session.run_until(pending()).await;

    assert!(matches!(end, SessionEnd::AuthRejected(_)));
    assert_eq!(session.engine().pending_reports(), 0);
    assert!(api.reported_cursors().is_empty());
    // the cursor itself is still persisted for the next login
    temp.child("U1/cursor").assert(token(5, 0).as_str());
}
