//! Integration tests for the WebSocket channel: identity announcement,
//! event dispatch, fan-out to both parties, typing relays, and the
//! REST-to-socket mirror.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Helper: start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = lavoro_server::db::init_db(&data_dir).expect("Failed to init DB");
    let connections = lavoro_server::ws::new_connection_registry();
    let state = lavoro_server::state::AppState { db, connections };

    let app = lavoro_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    let base_url = format!("http://{}", addr);
    (base_url, addr)
}

/// Connect a socket and announce the given identity.
async fn connect_user(addr: &SocketAddr, user_id: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    let (mut write, read) = ws_stream.split();

    write
        .send(Message::Text(
            json!({ "type": "user_connected", "user_id": user_id })
                .to_string()
                .into(),
        ))
        .await
        .expect("Failed to announce identity");
    // Binding has no ack; give the server a moment to process the frame
    // before other connections start emitting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (write, read)
}

/// Read the next JSON event, skipping protocol pings.
async fn next_json(read: &mut WsRead) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("Socket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

async fn expect_silence(read: &mut WsRead) {
    loop {
        match tokio::time::timeout(Duration::from_millis(300), read.next()).await {
            Err(_) => return, // Timeout: nothing arrived.
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected no event, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_events_require_identity_announcement() {
    let (_base_url, addr) = start_test_server().await;

    let ws_url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    // No user_connected yet: the event is refused, the connection stays up.
    write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "premature",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let event = next_json(&mut read).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], 401);

    // Announcing afterwards makes the same send work.
    write
        .send(Message::Text(
            json!({ "type": "user_connected", "user_id": "alice" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "now it works",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let event = next_json(&mut read).await;
    assert_eq!(event["type"], "message_sent");
    assert_eq!(event["message"]["body"], "now it works");
}

#[tokio::test]
async fn test_private_message_reaches_both_parties() {
    let (_base_url, addr) = start_test_server().await;
    let (mut alice_write, mut alice_read) = connect_user(&addr, "alice").await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;

    alice_write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "hi bob",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    // Receiver gets new_message, sender gets the message_sent ack, and
    // both carry the same canonical id.
    let to_bob = next_json(&mut bob_read).await;
    assert_eq!(to_bob["type"], "new_message");
    assert_eq!(to_bob["message"]["body"], "hi bob");
    assert_eq!(to_bob["message"]["sender_id"], "alice");

    let to_alice = next_json(&mut alice_read).await;
    assert_eq!(to_alice["type"], "message_sent");
    assert_eq!(to_alice["message"]["id"], to_bob["message"]["id"]);
}

#[tokio::test]
async fn test_socket_write_is_durable() {
    let (base_url, addr) = start_test_server().await;
    let (mut alice_write, mut alice_read) = connect_user(&addr, "alice").await;

    alice_write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "persisted",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut alice_read).await;
    assert_eq!(ack["type"], "message_sent");

    // Bob was never connected; REST still has the message.
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/chat/conversation/bob/alice", base_url))
        .send()
        .await
        .unwrap();
    let envelope: serde_json::Value = resp.json().await.unwrap();
    let messages = envelope["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["body"], "persisted");
}

#[tokio::test]
async fn test_spoofed_sender_is_rejected() {
    let (_base_url, addr) = start_test_server().await;
    let (mut mallory_write, mut mallory_read) = connect_user(&addr, "mallory").await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;

    mallory_write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "pretending to be alice",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let event = next_json(&mut mallory_read).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], 403);
    expect_silence(&mut bob_read).await;
}

#[tokio::test]
async fn test_typing_relay_is_transient() {
    let (base_url, addr) = start_test_server().await;
    let (mut alice_write, _alice_read) = connect_user(&addr, "alice").await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;

    alice_write
        .send(Message::Text(
            json!({ "type": "typing", "sender_id": "alice", "receiver_id": "bob" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let event = next_json(&mut bob_read).await;
    assert_eq!(event["type"], "user_typing");
    assert_eq!(event["sender_id"], "alice");

    alice_write
        .send(Message::Text(
            json!({ "type": "stop_typing", "sender_id": "alice", "receiver_id": "bob" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let event = next_json(&mut bob_read).await;
    assert_eq!(event["type"], "user_stop_typing");

    // Typing indicators leave no durable trace.
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/chat/conversation/bob/alice", base_url))
        .send()
        .await
        .unwrap();
    let envelope: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(envelope["data"]["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_rest_send_is_mirrored_to_connected_receiver() {
    let (base_url, addr) = start_test_server().await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/chat/message", base_url))
        .json(&json!({
            "sender_id": "alice",
            "receiver_id": "bob",
            "message": "over rest",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let event = next_json(&mut bob_read).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["message"]["body"], "over rest");
}

#[tokio::test]
async fn test_update_via_socket_notifies_both_parties() {
    let (_base_url, addr) = start_test_server().await;
    let (mut alice_write, mut alice_read) = connect_user(&addr, "alice").await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;

    alice_write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "tpyo",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut alice_read).await;
    let message_id = ack["message"]["id"].as_str().unwrap().to_string();
    let first = next_json(&mut bob_read).await;
    assert_eq!(first["type"], "new_message");

    alice_write
        .send(Message::Text(
            json!({
                "type": "update_message",
                "message_id": message_id,
                "requester_id": "alice",
                "body": "typo",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let to_bob = next_json(&mut bob_read).await;
    assert_eq!(to_bob["type"], "message_updated");
    assert_eq!(to_bob["message"]["body"], "typo");
    assert_eq!(to_bob["message"]["edited"], true);

    let to_alice = next_json(&mut alice_read).await;
    assert_eq!(to_alice["type"], "message_updated");
    assert_eq!(to_alice["message"]["id"], message_id);
}

#[tokio::test]
async fn test_group_send_fans_out_to_members_only() {
    let (base_url, addr) = start_test_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/chat/group", base_url))
        .json(&json!({ "name": "Team", "creator": "alice", "members": ["bob"] }))
        .send()
        .await
        .unwrap();
    let envelope: serde_json::Value = resp.json().await.unwrap();
    let group_id = envelope["data"]["id"].as_str().unwrap().to_string();

    let (mut alice_write, mut alice_read) = connect_user(&addr, "alice").await;
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;
    let (_eve_write, mut eve_read) = connect_user(&addr, "eve").await;

    alice_write
        .send(Message::Text(
            json!({
                "type": "group_message",
                "group_id": group_id,
                "sender_id": "alice",
                "body": "standup in 5",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let to_bob = next_json(&mut bob_read).await;
    assert_eq!(to_bob["type"], "new_group_message");
    assert_eq!(to_bob["message"]["group_id"], group_id);

    let to_alice = next_json(&mut alice_read).await;
    assert_eq!(to_alice["type"], "group_message_sent");

    // Eve is connected but not a member: nothing arrives.
    expect_silence(&mut eve_read).await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_connection_survives() {
    let (_base_url, addr) = start_test_server().await;
    let (mut write, mut read) = connect_user(&addr, "alice").await;

    write
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let event = next_json(&mut read).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["code"], 400);

    // The connection still dispatches after a bad frame.
    write
        .send(Message::Text(
            json!({ "type": "typing", "sender_id": "alice", "receiver_id": "bob" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    expect_silence(&mut read).await;
}

#[tokio::test]
async fn test_disconnect_cleans_up_registry() {
    let (_base_url, addr) = start_test_server().await;

    {
        let (mut write, _read) = connect_user(&addr, "bob").await;
        write.send(Message::Close(None)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A fresh connection under the same identity receives events normally.
    let (_bob_write, mut bob_read) = connect_user(&addr, "bob").await;
    let (mut alice_write, _alice_read) = connect_user(&addr, "alice").await;

    alice_write
        .send(Message::Text(
            json!({
                "type": "private_message",
                "sender_id": "alice",
                "receiver_id": "bob",
                "body": "after reconnect",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let event = next_json(&mut bob_read).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["message"]["body"], "after reconnect");
}
