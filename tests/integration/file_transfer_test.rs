// tests/integration/file_transfer_test.rs

//! End-to-end tests for live file relay and store-and-forward delivery.

use super::test_helpers::{TestContext, wait_until};
use chatrelay::config::Config;
use chatrelay::core::persistence::Persistence;
use serde_json::json;

fn file_offer(filename: &str, payload: &[u8], receiver: &str) -> Vec<u8> {
    let header = json!({
        "type": "file_transfer",
        "filename": filename,
        "size": payload.len().to_string(),
        "receiveid": receiver,
    });
    let mut bytes = header.to_string().into_bytes();
    bytes.extend_from_slice(payload);
    bytes
}

fn sample_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_live_file_relay() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    let payload = sample_payload(10_000);
    let mut wire = file_offer("photo.png", &payload, "9");
    wire.extend_from_slice(br#"{"type":"message","receiveid":"9","content":"after"}"#);
    five.send_raw(&wire).await;

    let notify = nine.recv().await;
    assert_eq!(
        notify,
        json!({"type": "file_notify", "filename": "photo.png", "size": "10000", "sender_id": "5"})
    );
    assert_eq!(nine.recv_bytes(payload.len()).await, payload);

    // The chat that followed the payload on the same write is still framed.
    let chat = nine.recv().await;
    assert_eq!(chat["content"], "after");
    assert_eq!(ctx.state.transfers.pending_len().await, 0);
    assert_eq!(ctx.storage_entries(), 0);
}

#[tokio::test]
async fn test_live_relay_with_payload_split_across_writes() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    let payload = sample_payload(300_000);
    let wire = file_offer("big.bin", &payload, "9");
    let reader = tokio::spawn(async move {
        let notify = nine.recv().await;
        let bytes = nine.recv_bytes(300_000).await;
        (notify, bytes)
    });

    for chunk in wire.chunks(7_777) {
        five.send_raw(chunk).await;
    }

    let (notify, bytes) = reader.await.unwrap();
    assert_eq!(notify["size"], "300000");
    assert_eq!(bytes, payload);
}

#[tokio::test]
async fn test_offline_file_is_delivered_on_login() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;

    let payload = sample_payload(4_096);
    five.send_raw(&file_offer("report.pdf", &payload, "9")).await;

    let store = ctx.store.clone();
    wait_until(|| store.queued_len() == 1).await;
    assert_eq!(ctx.state.transfers.pending_len().await, 1);
    assert_eq!(ctx.storage_entries(), 1);

    let queued = store.list_offline_messages("9").await.unwrap();
    let key = queued[0].file_key().expect("sentinel record").to_string();
    assert!(key.starts_with("5_9_"));
    assert!(key.ends_with("_report.pdf"));

    let (mut nine, _) = ctx.login(9).await;
    let notify = nine.recv().await;
    assert_eq!(notify["type"], "file_notify");
    assert_eq!(notify["filename"], "report.pdf");
    assert_eq!(notify["size"], "4096");
    assert_eq!(notify["sender_id"], "5");
    assert_eq!(nine.recv_bytes(payload.len()).await, payload);

    wait_until(|| store.queued_len() == 0).await;
    assert_eq!(ctx.state.transfers.pending_len().await, 0);
    assert!(ctx.state.transfers.pending_file(&key).await.is_none());
    assert_eq!(ctx.storage_entries(), 0);
}

#[tokio::test]
async fn test_filename_cannot_escape_storage_dir() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;

    five.send_raw(&file_offer("../../evil.txt", b"payload", "9"))
        .await;
    let store = ctx.store.clone();
    wait_until(|| store.queued_len() == 1).await;

    let names: Vec<String> = std::fs::read_dir(ctx.storage_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("_evil.txt"));
    assert!(!names[0].contains('/'));
}

#[tokio::test]
async fn test_oversized_offer_is_drained() {
    let mut config = Config::default();
    config.files.max_file_size = 16;
    let ctx = TestContext::with_config(config).await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    let mut wire = file_offer("huge.bin", &sample_payload(64), "9");
    wire.extend_from_slice(br#"{"type":"message","receiveid":"9","content":"next"}"#);
    five.send_raw(&wire).await;

    // Nothing was relayed, and the sender's stream is still aligned.
    let chat = nine.recv().await;
    assert_eq!(chat["type"], "message");
    assert_eq!(chat["content"], "next");
    assert_eq!(ctx.storage_entries(), 0);
}

#[tokio::test]
async fn test_empty_file_is_relayed() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;
    let (mut nine, _) = ctx.login(9).await;

    five.send_raw(&file_offer("empty.txt", b"", "9")).await;
    five.send_chat("9", "done").await;

    let notify = nine.recv().await;
    assert_eq!(notify["size"], "0");
    assert_eq!(nine.recv().await["content"], "done");
}

#[tokio::test]
async fn test_sender_disconnect_mid_payload_discards_partial_file() {
    let ctx = TestContext::new().await;
    ctx.seed_users(9);
    let (mut five, _) = ctx.login(5).await;

    let payload = sample_payload(1_000);
    let wire = file_offer("cut.bin", &payload, "9");
    five.send_raw(&wire[..wire.len() - 500]).await;

    let result = five.hang_up().await;
    assert!(result.is_err());
    assert_eq!(ctx.state.transfers.pending_len().await, 0);
    assert_eq!(ctx.store.queued_len(), 0);
    assert_eq!(ctx.storage_entries(), 0);
}
