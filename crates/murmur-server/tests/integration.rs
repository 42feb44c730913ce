//! End-to-end tests using a real WebSocket client.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use murmur_server::{ChatServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a test server on an ephemeral port.
async fn boot_with(config: ServerConfig) -> (ChatServer, SocketAddr, tokio::task::JoinHandle<()>) {
    let server = ChatServer::new(config);
    let (addr, handle) = server.listen().await.unwrap();
    (server, addr, handle)
}

async fn boot() -> (ChatServer, SocketAddr) {
    let (server, addr, _handle) = boot_with(ServerConfig::default()).await;
    (server, addr)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");
        match msg {
            Message::Text(t) => return serde_json::from_str(t.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Read until the server's Close frame and return its code and reason.
async fn expect_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without close frame")
            .expect("transport error");
        match msg {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned());
            }
            Message::Close(None) => panic!("close frame without code"),
            Message::Text(t) => panic!("unexpected text before close: {t}"),
            _ => {}
        }
    }
}

/// Assert that no text frame arrives within `QUIET`.
async fn expect_silence(ws: &mut WsStream) {
    let deadline = Instant::now() + QUIET;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(t)))) => panic!("unexpected frame: {t}"),
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("connection ended: {other:?}"),
        }
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Connect and complete the handshake, waiting until the server has
/// registered the connection.
async fn join(server: &ChatServer, addr: SocketAddr, name: &str) -> WsStream {
    let before = server.lifecycle().registry().len();
    let mut ws = connect(addr).await;
    send_json(&mut ws, &json!({"type": "register", "username": name})).await;
    let registry = server.lifecycle().registry();
    wait_until(|| registry.len() > before).await;
    ws
}

#[tokio::test]
async fn message_reaches_every_peer_but_sender() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;
    let mut carol = join(&server, addr, "carol").await;

    send_json(&mut alice, &json!({"type": "message", "text": "hello"})).await;

    let expected = json!({"type": "message", "from": "alice", "text": "hello"});
    assert_eq!(read_json(&mut bob).await, expected);
    assert_eq!(read_json(&mut carol).await, expected);
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn typing_is_relayed_with_sender_name() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    send_json(&mut bob, &json!({"type": "typing"})).await;
    assert_eq!(
        read_json(&mut alice).await,
        json!({"type": "typing", "from": "bob"})
    );
}

#[tokio::test]
async fn spoofed_sender_is_overwritten() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    send_json(
        &mut alice,
        &json!({"type": "message", "from": "bob", "text": "it was me"}),
    )
    .await;
    let got = read_json(&mut bob).await;
    assert_eq!(got["from"], "alice");
    assert_eq!(got["text"], "it was me");
}

#[tokio::test]
async fn per_sender_order_is_preserved() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    for i in 0..50 {
        send_json(&mut alice, &json!({"type": "message", "text": format!("m{i}")})).await;
    }
    for i in 0..50 {
        assert_eq!(read_json(&mut bob).await["text"], format!("m{i}"));
    }
}

#[tokio::test]
async fn username_is_trimmed() {
    let (server, addr) = boot().await;
    let _alice = join(&server, addr, "  alice  ").await;
    assert_eq!(server.lifecycle().registry().names(), vec!["alice"]);
}

#[tokio::test]
async fn empty_username_closes_with_invalid_payload() {
    let (server, addr) = boot().await;
    let mut ws = connect(addr).await;
    send_json(&mut ws, &json!({"type": "register", "username": "   "})).await;

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1007);
    assert_eq!(reason, "username must not be empty");
    assert!(server.lifecycle().registry().is_empty());
}

#[tokio::test]
async fn message_before_register_closes_with_policy_violation() {
    let (server, addr) = boot().await;
    let mut observer = join(&server, addr, "observer").await;
    let mut ws = connect(addr).await;
    send_json(&mut ws, &json!({"type": "message", "text": "sneaky"})).await;

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "register first");
    expect_silence(&mut observer).await;
}

#[tokio::test]
async fn malformed_json_closes_connection() {
    let (_server, addr) = boot().await;
    let mut ws = connect(addr).await;
    ws.send(Message::text("{not json")).await.unwrap();
    assert_eq!(expect_close(&mut ws).await.0, 1008);
}

#[tokio::test]
async fn unknown_kind_closes_connection() {
    let (_server, addr) = boot().await;
    let mut ws = connect(addr).await;
    send_json(&mut ws, &json!({"type": "join", "room": "lobby"})).await;
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "unknown envelope type");
}

#[tokio::test]
async fn non_utf8_binary_frame_closes_connection() {
    let (_server, addr) = boot().await;
    let mut ws = connect(addr).await;
    ws.send(Message::binary(vec![0xff, 0xfe, 0xfd]))
        .await
        .unwrap();
    assert_eq!(expect_close(&mut ws).await.0, 1008);
}

#[tokio::test]
async fn utf8_binary_frame_is_accepted() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    let payload = json!({"type": "message", "text": "binary hi"}).to_string();
    bob.send(Message::binary(payload.into_bytes())).await.unwrap();
    assert_eq!(read_json(&mut alice).await["text"], "binary hi");
}

#[tokio::test]
async fn duplicate_register_is_ignored() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    send_json(&mut alice, &json!({"type": "register", "username": "mallory"})).await;
    send_json(&mut alice, &json!({"type": "message", "text": "still me"})).await;

    let got = read_json(&mut bob).await;
    assert_eq!(got["from"], "alice");
    assert_eq!(server.lifecycle().registry().names(), vec!["alice", "bob"]);
}

#[tokio::test]
async fn disconnect_removes_from_registry() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    bob.close(None).await.unwrap();
    let registry = server.lifecycle().registry();
    wait_until(|| registry.len() == 1).await;
    assert_eq!(registry.names(), vec!["alice"]);

    send_json(&mut alice, &json!({"type": "message", "text": "anyone?"})).await;
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn dead_recipient_does_not_block_others() {
    let (server, addr) = boot().await;
    let mut alice = join(&server, addr, "alice").await;
    let bob = join(&server, addr, "bob").await;
    let mut carol = join(&server, addr, "carol").await;

    drop(bob);
    send_json(&mut alice, &json!({"type": "message", "text": "still here"})).await;
    assert_eq!(read_json(&mut carol).await["text"], "still here");

    let registry = server.lifecycle().registry();
    wait_until(|| registry.len() == 2).await;
    assert_eq!(registry.names(), vec!["alice", "carol"]);
}

#[tokio::test]
async fn registry_tracks_registered_set_through_churn() {
    let (server, addr) = boot().await;
    let mut registered = Vec::new();
    for name in ["a", "b", "c", "d"] {
        registered.push(join(&server, addr, name).await);
    }
    let _pending = connect(addr).await;
    let lifecycle = server.lifecycle();
    wait_until(|| lifecycle.open_connections() == 5).await;

    let mut b = registered.remove(1);
    b.close(None).await.unwrap();
    drop(registered.remove(2));

    let registry = lifecycle.registry();
    wait_until(|| registry.len() == 2).await;
    assert_eq!(registry.names(), vec!["a", "c"]);
    wait_until(|| lifecycle.open_connections() == 3).await;
}

#[tokio::test]
async fn root_path_accepts_upgrade() {
    let (server, addr) = boot().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    send_json(&mut ws, &json!({"type": "register", "username": "root"})).await;
    let registry = server.lifecycle().registry();
    wait_until(|| registry.len() == 1).await;
}

#[tokio::test]
async fn connection_cap_refuses_upgrade() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (server, addr, _handle) = boot_with(config).await;
    let _first = connect(addr).await;
    let lifecycle = server.lifecycle();
    wait_until(|| lifecycle.open_connections() == 1).await;

    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 503),
        Err(e) => panic!("expected 503, got {e}"),
        Ok(_) => panic!("upgrade accepted past the connection cap"),
    }
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let config = ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::default()
    };
    let (server, addr, _handle) = boot_with(config).await;
    let mut alice = join(&server, addr, "alice").await;
    let mut bob = join(&server, addr, "bob").await;

    let text = "x".repeat(4096);
    let _ = alice
        .send(Message::text(json!({"type": "message", "text": text}).to_string()))
        .await;
    let (code, reason) = expect_close(&mut alice).await;
    assert_eq!(code, 1009);
    assert_eq!(reason, "message too big");
    expect_silence(&mut bob).await;
    let registry = server.lifecycle().registry();
    wait_until(|| registry.len() == 1).await;
}

#[tokio::test]
async fn silent_client_is_dropped_by_heartbeat() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (server, addr, _handle) = boot_with(config).await;
    let mut ws = join(&server, addr, "sleepy").await;

    // Not polling the stream means pings go unanswered.
    let registry = server.lifecycle().registry();
    wait_until(|| registry.is_empty()).await;

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "heartbeat timeout");
}

#[tokio::test]
async fn idle_client_answering_pings_stays_connected() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (server, addr, _handle) = boot_with(config).await;
    let mut ws = join(&server, addr, "idle").await;

    // Polling the stream lets the client answer each Ping with a Pong.
    let deadline = Instant::now() + Duration::from_millis(3500);
    let mut pings = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, ws.next()).await {
            Err(_) => break,
            Ok(Some(Ok(Message::Ping(_)))) => pings += 1,
            Ok(Some(Ok(Message::Pong(_)))) => {}
            Ok(other) => panic!("connection ended while answering pings: {other:?}"),
        }
    }

    assert!(pings >= 2, "expected repeated pings, got {pings}");
    assert_eq!(server.lifecycle().registry().names(), vec!["idle"]);
}

#[tokio::test]
async fn graceful_shutdown_closes_sessions() {
    let (server, addr, handle) = boot_with(ServerConfig::default()).await;
    let mut alice = join(&server, addr, "alice").await;

    server
        .shutdown()
        .graceful_shutdown(vec![handle], Duration::from_secs(5))
        .await;

    let (code, reason) = expect_close(&mut alice).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "server shutting down");
    assert!(server.lifecycle().registry().is_empty());
    assert_eq!(server.lifecycle().open_connections(), 0);
}
