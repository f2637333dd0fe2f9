//! Shared harness: a real relay bound to a random local port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use relay_server::config::KeepaliveSettings;
use relay_server::dm::dispatcher::spawn_dispatcher;
use relay_server::dm::store::SqliteMessageStore;
use relay_server::state::AppState;
use relay_server::ws::registry::ConnectionRegistry;

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Short timers so keepalive behavior is observable within a test.
pub fn fast_keepalive() -> KeepaliveSettings {
    KeepaliveSettings {
        ping_interval: Duration::from_millis(100),
        read_timeout: Duration::from_millis(300),
        auth_timeout: Duration::from_millis(300),
        write_timeout: Duration::from_secs(1),
    }
}

/// Lenient timers for tests that are not about keepalive.
pub fn relaxed_keepalive() -> KeepaliveSettings {
    KeepaliveSettings {
        ping_interval: Duration::from_secs(5),
        read_timeout: Duration::from_secs(15),
        auth_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(1),
    }
}

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
}

/// Start the server on a random port with a fresh on-disk database.
pub async fn start_test_server(keepalive: KeepaliveSettings) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = relay_server::db::init_db(&data_dir).expect("Failed to init DB");
    let store = Arc::new(SqliteMessageStore::new(db));
    let registry = Arc::new(ConnectionRegistry::new());
    let (inbound_tx, _dispatcher) =
        spawn_dispatcher(store.clone(), registry.clone(), keepalive.write_timeout, 64);

    let state = AppState {
        store,
        registry: registry.clone(),
        inbound_tx,
        keepalive,
    };

    let app = relay_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        registry,
    }
}

/// Open a socket without authenticating.
pub async fn open_socket(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{}/api/message", addr);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect WebSocket");
    ws
}

/// Open a socket, authenticate as `user_id` and wait for the acknowledgment.
pub async fn connect_as(addr: SocketAddr, user_id: u64) -> WsClient {
    let mut ws = open_socket(addr).await;
    ws.send(Message::Text(json!({ "user_id": user_id }).to_string().into()))
        .await
        .unwrap();

    let ack = next_json(&mut ws, Duration::from_secs(2))
        .await
        .expect("Expected connected acknowledgment");
    assert_eq!(ack["type"], "connected");
    assert_eq!(ack["user_id"], user_id);
    ws
}

pub async fn send_chat(ws: &mut WsClient, sender_id: u64, receiver_id: u64, content: &str) {
    let frame = json!({
        "sender_id": sender_id,
        "receiver_id": receiver_id,
        "content": content,
    });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON text frame, skipping control frames. `None` on timeout, close
/// or stream end.
pub async fn next_json(ws: &mut WsClient, within: Duration) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Server sent invalid JSON"));
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Read until the server closes the socket. Returns the close code if the
/// server sent a close frame carrying one.
pub async fn wait_for_close(ws: &mut WsClient, within: Duration) -> Option<u16> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => return frame.map(|f| u16::from(f.code)),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => panic!("Server did not close the socket within {:?}", within),
        }
    }
}

/// Poll until `user_id` has (or lacks) a registered connection.
pub async fn wait_for_online(registry: &ConnectionRegistry, user_id: u64, online: bool) {
    for _ in 0..200 {
        if registry.lookup(user_id).is_some() == online {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("User {} online state never became {}", user_id, online);
}
