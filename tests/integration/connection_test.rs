// tests/integration/connection_test.rs

//! End-to-end tests for the connection lifecycle: login, friend-list sync,
//! offline replay, routing and teardown.

use super::test_helpers::{PASSWORD, TestContext, wait_until};
use chatrelay::RelayError;
use chatrelay::config::Config;
use chatrelay::connection::{ConnectionGuard, ConnectionHandler};
use chatrelay::core::persistence::Persistence;
use chatrelay::core::state::{BoxedWriter, Client};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_login_returns_account_id() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);

    let mut client = ctx.connect();
    let response = client.login("user7", PASSWORD).await;

    assert_eq!(
        response,
        json!({"type": "login_response", "success": true, "message": "id:7"})
    );
    assert!(ctx.is_online(7).await);
    assert!(ctx.state.registry.lookup("7").is_some());
}

#[tokio::test]
async fn test_friend_list_follows_login() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    ctx.befriend(7, 3).await;

    let (_client, friends) = ctx.login(7).await;

    assert_eq!(
        friends["friends"],
        json!([{"user_id": "3", "name": "user3", "status": 1, "online": false}])
    );
}

#[tokio::test]
async fn test_friend_list_reports_online_peers() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    ctx.befriend(7, 3).await;

    let (_three, _) = ctx.login(3).await;
    let (_seven, friends) = ctx.login(7).await;

    assert_eq!(friends["friends"][0]["online"], true);
}

#[tokio::test]
async fn test_empty_friend_list_is_still_sent() {
    let ctx = TestContext::new().await;
    ctx.seed_users(2);

    let (_client, friends) = ctx.login(1).await;
    assert_eq!(friends["friends"], json!([]));
}

#[tokio::test]
async fn test_bad_password_is_rejected_and_closed() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);

    let mut client = ctx.connect();
    let response = client.login("user7", "wrong").await;

    assert_eq!(response["type"], "login_response");
    assert_eq!(response["success"], false);
    assert!(client.is_closed().await);
    assert_eq!(client.finish().await, Err(RelayError::BadCredential));
    assert!(!ctx.is_online(7).await);
    assert!(ctx.state.registry.is_empty());
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.seed_users(2);

    let mut client = ctx.connect();
    let response = client.login("ghost", PASSWORD).await;

    assert_eq!(response["success"], false);
    assert_eq!(
        client.finish().await,
        Err(RelayError::UnknownUser("ghost".to_string()))
    );
}

#[tokio::test]
async fn test_first_message_must_be_login() {
    let ctx = TestContext::new().await;
    ctx.seed_users(2);

    let mut client = ctx.connect();
    client.send_chat("2", "hello").await;
    let response = client.recv().await;

    assert_eq!(response["success"], false);
    assert!(matches!(
        client.finish().await,
        Err(RelayError::MalformedLogin(_))
    ));
    assert_eq!(ctx.store.queued_len(), 0);
}

#[tokio::test]
async fn test_login_times_out() {
    let config = Config {
        login_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let ctx = TestContext::with_config(config).await;

    let mut client = ctx.connect();
    let response = client.recv().await;

    assert_eq!(response["success"], false);
    assert_eq!(client.finish().await, Err(RelayError::AuthTimeout));
}

#[tokio::test]
async fn test_login_split_across_writes() {
    let ctx = TestContext::new().await;
    ctx.seed_users(3);

    let mut client = ctx.connect();
    client.send_raw(b"garbage before {\"type\":\"login\",").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client
        .send_raw(b"\"name\":\"user3\",\"pwd\":\"pw\"}")
        .await;

    let response = client.recv().await;
    assert_eq!(response["message"], "id:3");
}

#[tokio::test]
async fn test_live_chat_is_stamped_with_sender_id() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    five.send_json(json!({
        "type": "message",
        "receiveid": "9",
        "sendid": "1",
        "content": "hello",
        "sendTime": "2024-05-01 10:00:00",
    }))
    .await;

    let message = nine.recv().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["sendid"], "5");
    assert_eq!(message["receiveid"], "9");
    assert_eq!(message["content"], "hello");
    assert_eq!(message["sendTime"], "2024-05-01 10:00:00");
    assert_eq!(ctx.store.queued_len(), 0);
}

#[tokio::test]
async fn test_coalesced_and_split_chats_arrive_in_order() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    five.send_raw(
        br#"{"type":"message","receiveid":"9","content":"a"}{"type":"message","receiveid":"9","content":"b } {"}{"type":"mess"#,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    five.send_raw(br#"age","receiveid":"9","content":"c"}"#).await;

    assert_eq!(nine.recv().await["content"], "a");
    assert_eq!(nine.recv().await["content"], "b } {");
    assert_eq!(nine.recv().await["content"], "c");
}

#[tokio::test]
async fn test_offline_chat_is_replayed_on_login() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;

    five.send_chat("9", "are you there?").await;
    let store = ctx.store.clone();
    wait_until(|| store.queued_len() == 1).await;

    let (mut nine, _) = ctx.login(9).await;
    let message = nine.recv().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["sendid"], "5");
    assert_eq!(message["receiveid"], "9");
    assert_eq!(message["content"], "are you there?");
    assert_eq!(message["sendTime"].as_str().map(str::len), Some(19));

    wait_until(|| store.queued_len() == 0).await;
    assert!(store.list_offline_messages("9").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_replay_is_newest_first() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    for content in ["first", "second", "third"] {
        ctx.store
            .enqueue_offline_message("5", "9", content)
            .await
            .unwrap();
    }

    let (mut nine, _) = ctx.login(9).await;
    assert_eq!(nine.recv().await["content"], "third");
    assert_eq!(nine.recv().await["content"], "second");
    assert_eq!(nine.recv().await["content"], "first");
}

#[tokio::test]
async fn test_offline_chat_starting_with_file_prefix_is_delivered() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let store = ctx.store.clone();

    five.send_chat("9", "file:notes.txt is attached below").await;
    wait_until(|| store.queued_len() == 1).await;
    five.send_chat("9", "\\file:not a file either").await;
    wait_until(|| store.queued_len() == 2).await;

    let (mut nine, _) = ctx.login(9).await;
    assert_eq!(nine.recv().await["content"], "\\file:not a file either");
    let message = nine.recv().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["sendid"], "5");
    assert_eq!(message["content"], "file:notes.txt is attached below");

    wait_until(|| store.queued_len() == 0).await;
    assert_eq!(ctx.storage_entries(), 0);
}

#[tokio::test]
async fn test_replay_drops_dangling_file_reference_and_continues() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    ctx.store
        .enqueue_offline_message("5", "9", "older")
        .await
        .unwrap();
    ctx.store
        .enqueue_offline_message("5", "9", "file:5_9_1_gone.bin")
        .await
        .unwrap();

    let (mut nine, _) = ctx.login(9).await;
    assert_eq!(nine.recv().await["content"], "older");
    let store = ctx.store.clone();
    wait_until(|| store.queued_len() == 0).await;

    // The session went on to the active loop.
    let (mut five, _) = ctx.login(5).await;
    five.send_chat("9", "live").await;
    assert_eq!(nine.recv().await["content"], "live");
}

#[tokio::test]
async fn test_login_response_precedes_live_chats() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;

    let flood = tokio::spawn(async move {
        for i in 0..200 {
            five.send_chat("9", &format!("m{i}")).await;
        }
        five
    });
    let mut nine = ctx.connect();
    let response = nine.login("user9", PASSWORD).await;
    assert_eq!(response["type"], "login_response");
    assert_eq!(response["success"], true);
    let _five = flood.await.unwrap();
}

#[tokio::test]
async fn test_unwritable_login_response_leaves_account_offline() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let login = json!({"type": "login", "name": "user7", "pwd": PASSWORD}).to_string();
    let stream = tokio_test::io::Builder::new()
        .read(login.as_bytes())
        .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        .build();
    let handler = ConnectionHandler::new(
        stream,
        "127.0.0.1:49999".parse().unwrap(),
        ctx.state.clone(),
        99,
        ctx.shutdown_tx.subscribe(),
    );

    let err = handler.run().await.unwrap_err();
    assert!(matches!(err, RelayError::Io(_)));
    assert!(!err.is_auth_failure());
    assert!(ctx.state.registry.lookup("7").is_none());
    assert!(!ctx.is_online(7).await);
}

#[tokio::test]
async fn test_bad_messages_do_not_close_the_connection() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    five.send_raw(br#"{"type":"bogus"}{not json}{"content":"no type"}"#)
        .await;
    five.send_json(json!({"type": "login", "name": "user5", "pwd": "pw"}))
        .await;
    five.send_chat("9", "still here").await;

    assert_eq!(nine.recv().await["content"], "still here");
}

#[tokio::test]
async fn test_change_password() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut seven, _) = ctx.login(7).await;

    seven
        .send_json(json!({"type": "changepwd", "oldpwd": "nope", "newpwd": "next"}))
        .await;
    let rejected = seven.recv().await;
    assert_eq!(rejected["type"], "changepwd_response");
    assert_eq!(rejected["status"], "fail");

    seven
        .send_json(json!({"type": "changepwd", "oldpwd": PASSWORD, "newpwd": "next"}))
        .await;
    let accepted = seven.recv().await;
    assert_eq!(accepted["status"], "success");

    assert_eq!(seven.hang_up().await, Ok(()));
    let mut again = ctx.connect();
    let response = again.login("user7", "next").await;
    assert_eq!(response["success"], true);
}

#[tokio::test]
async fn test_change_name() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut seven, _) = ctx.login(7).await;

    seven
        .send_json(json!({"type": "changename", "name": "user3"}))
        .await;
    assert_eq!(seven.recv().await["status"], "fail");

    seven
        .send_json(json!({"type": "changename", "name": "seven"}))
        .await;
    let response = seven.recv().await;
    assert_eq!(response["type"], "changename_response");
    assert_eq!(response["status"], "success");

    let account = ctx.store.find_account_by_id(7).await.unwrap();
    assert_eq!(account.name, "seven");
}

#[tokio::test]
async fn test_disconnect_marks_account_offline() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (seven, _) = ctx.login(7).await;
    assert!(ctx.is_online(7).await);

    assert_eq!(seven.hang_up().await, Ok(()));
    assert!(!ctx.is_online(7).await);
    assert!(ctx.state.registry.lookup("7").is_none());

    let account = ctx.store.find_account_by_id(7).await.unwrap();
    assert!(account.leave_at.is_some());
}

#[tokio::test]
async fn test_kick_closes_the_connection() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut seven, _) = ctx.login(7).await;

    assert!(ctx.state.registry.kick("7"));
    assert!(seven.is_closed().await);
    assert_eq!(seven.finish().await, Ok(()));
    assert!(!ctx.is_online(7).await);
    assert!(!ctx.state.registry.kick("7"));
}

#[tokio::test]
async fn test_second_login_replaces_the_first() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (first, _) = ctx.login(7).await;
    let (second, _) = ctx.login(7).await;

    let entry = ctx.state.registry.lookup("7").unwrap();
    assert_eq!(entry.session_id(), 2);

    // The older session going away must not unregister the newer one.
    assert_eq!(first.hang_up().await, Ok(()));
    assert_eq!(ctx.state.registry.lookup("7").unwrap().session_id(), 2);
    assert!(ctx.is_online(7).await);

    assert_eq!(second.hang_up().await, Ok(()));
    assert!(ctx.state.registry.is_empty());
    assert!(!ctx.is_online(7).await);
}

#[tokio::test]
async fn test_server_shutdown_closes_active_connections() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut seven, _) = ctx.login(7).await;

    ctx.shutdown_tx.send(()).unwrap();
    assert!(seven.is_closed().await);
    assert_eq!(seven.finish().await, Ok(()));
    assert!(!ctx.is_online(7).await);
}

#[tokio::test]
async fn test_guard_close_is_idempotent() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);

    let writer: BoxedWriter = Box::new(tokio::io::sink());
    let (kill_tx, _kill_rx) = broadcast::channel(1);
    let client = Arc::new(Client::new(
        "7",
        42,
        "127.0.0.1",
        Arc::new(tokio::sync::Mutex::new(writer)),
        kill_tx,
    ));
    ctx.state.registry.register("7", client);
    ctx.store.set_online(7, "127.0.0.1").await.unwrap();

    let mut guard = ConnectionGuard::new(ctx.state.clone(), 42, "127.0.0.1:40042");
    guard.bind("7");

    assert!(guard.close().await);
    assert!(guard.is_closed());
    assert!(ctx.state.registry.lookup("7").is_none());
    assert!(!ctx.is_online(7).await);

    ctx.store.set_online(7, "127.0.0.1").await.unwrap();
    assert!(!guard.close().await);
    assert!(ctx.is_online(7).await);
}

#[tokio::test]
async fn test_dropped_guard_still_cleans_up() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);

    let writer: BoxedWriter = Box::new(tokio::io::sink());
    let (kill_tx, _kill_rx) = broadcast::channel(1);
    let client = Arc::new(Client::new(
        "4",
        8,
        "127.0.0.1",
        Arc::new(tokio::sync::Mutex::new(writer)),
        kill_tx,
    ));
    ctx.state.registry.register("4", client);
    ctx.store.set_online(4, "127.0.0.1").await.unwrap();

    {
        let mut guard = ConnectionGuard::new(ctx.state.clone(), 8, "127.0.0.1:40008");
        guard.bind("4");
    }

    assert!(ctx.state.registry.lookup("4").is_none());
    let store = ctx.store.clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.find_account_by_id(4).await.unwrap().online {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
