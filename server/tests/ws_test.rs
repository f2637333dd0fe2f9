//! Integration tests for WebSocket authentication, keepalive, eviction and delivery.

mod common;

use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use common::*;

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_second_login_evicts_first() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut first = connect_as(server.addr, 1).await;
    let mut second = connect_as(server.addr, 1).await;

    let code = wait_for_close(&mut first, Duration::from_secs(2)).await;
    assert_eq!(code, Some(4000), "Evicted socket should get the replaced code");

    // Messages for user 1 now land on the newer socket
    let mut other = connect_as(server.addr, 2).await;
    send_chat(&mut other, 2, 1, "ping").await;
    let delivered = next_json(&mut second, Duration::from_secs(2))
        .await
        .expect("Newer socket should receive the message");
    assert_eq!(delivered["content"], "ping");
    assert_eq!(server.registry.online_count(), 2);
}

#[tokio::test]
async fn test_offline_recipient_gets_message_later() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut sender = connect_as(server.addr, 1).await;
    send_chat(&mut sender, 1, 2, "hi").await;

    assert!(
        next_json(&mut sender, QUIET).await.is_none(),
        "No confirmation for an offline recipient"
    );

    let pending: Vec<serde_json::Value> =
        reqwest::get(format!("{}/api/messages/undelivered/2", server.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["sender_id"], 1);
    assert_eq!(pending[0]["content"], "hi");
    assert_eq!(pending[0]["is_delivered"], false);
}

#[tokio::test]
async fn test_online_delivery_and_confirmation() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut sender = connect_as(server.addr, 1).await;
    let mut recipient = connect_as(server.addr, 2).await;
    send_chat(&mut sender, 1, 2, "hi").await;

    let delivered = next_json(&mut recipient, Duration::from_secs(2))
        .await
        .expect("Recipient should receive the message");
    assert_eq!(delivered["sender_id"], 1);
    assert_eq!(delivered["receiver_id"], 2);
    assert_eq!(delivered["content"], "hi");
    assert!(delivered["id"].as_i64().unwrap() > 0);

    let confirmation = next_json(&mut sender, Duration::from_secs(2))
        .await
        .expect("Sender should be confirmed");
    assert_eq!(confirmation["type"], "delivery_confirmation");
    assert_eq!(confirmation["recipient_id"], 2);
    assert_eq!(confirmation["message_time"], delivered["created_at"]);

    let pending: Vec<serde_json::Value> =
        reqwest::get(format!("{}/api/messages/undelivered/2", server.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert!(pending.is_empty(), "Delivered message must be marked");
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut sender = connect_as(server.addr, 1).await;
    let mut recipient = connect_as(server.addr, 2).await;
    for i in 0..5 {
        send_chat(&mut sender, 1, 2, &format!("m{i}")).await;
    }

    for i in 0..5 {
        let delivered = next_json(&mut recipient, Duration::from_secs(2))
            .await
            .expect("Expected message");
        assert_eq!(delivered["content"], format!("m{i}"));
    }
}

#[tokio::test]
async fn test_disconnect_unregisters_and_later_messages_are_stored() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut sender = connect_as(server.addr, 1).await;
    let mut recipient = connect_as(server.addr, 2).await;
    wait_for_online(&server.registry, 2, true).await;

    recipient.close(None).await.unwrap();
    drop(recipient);
    wait_for_online(&server.registry, 2, false).await;

    send_chat(&mut sender, 1, 2, "while you were away").await;
    assert!(next_json(&mut sender, QUIET).await.is_none());

    let pending: Vec<serde_json::Value> =
        reqwest::get(format!("{}/api/messages/undelivered/2", server.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["content"], "while you were away");
}

#[tokio::test]
async fn test_invalid_frames_do_not_close_session() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut sender = connect_as(server.addr, 1).await;
    let mut recipient = connect_as(server.addr, 2).await;

    sender
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    sender
        .send(Message::Text(r#"{"sender_id":1,"content":"no receiver"}"#.into()))
        .await
        .unwrap();
    send_chat(&mut sender, 1, 2, "still here").await;

    let delivered = next_json(&mut recipient, Duration::from_secs(2))
        .await
        .expect("Valid message after invalid ones should be delivered");
    assert_eq!(delivered["content"], "still here");
}

#[tokio::test]
async fn test_malformed_auth_closes_without_registering() {
    let server = start_test_server(relaxed_keepalive()).await;

    let mut ws = open_socket(server.addr).await;
    ws.send(Message::Text(r#"{"user_id": "nope"}"#.into()))
        .await
        .unwrap();

    wait_for_close(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(server.registry.online_count(), 0);
}

#[tokio::test]
async fn test_auth_timeout_closes_socket() {
    let server = start_test_server(fast_keepalive()).await;

    let mut ws = open_socket(server.addr).await;
    wait_for_close(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(server.registry.online_count(), 0);
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_read_deadline() {
    let server = start_test_server(fast_keepalive()).await;

    let mut ws = connect_as(server.addr, 7).await;
    wait_for_online(&server.registry, 7, true).await;

    // Not polling the socket means pings go unanswered
    tokio::time::sleep(Duration::from_millis(600)).await;
    wait_for_online(&server.registry, 7, false).await;

    // The server has already torn the socket down, so the client may see the
    // close frame or just the end of the stream; either way it must end.
    wait_for_close(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(server.registry.online_count(), 0);
}

#[tokio::test]
async fn test_answering_pings_keeps_connection_alive() {
    let server = start_test_server(fast_keepalive()).await;

    let mut ws = connect_as(server.addr, 8).await;

    // Reading lets the client answer pings; three read deadlines pass
    assert!(next_json(&mut ws, Duration::from_millis(900)).await.is_none());
    assert!(server.registry.lookup(8).is_some());

    let health: serde_json::Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["online"], 1);
}
