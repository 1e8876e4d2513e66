// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the connection lifecycle of the relay server.
//!
//! Covers the health endpoint, the origin allow-list on upgrade, subscription
//! cleanup on disconnect, oversized frames, keepalive pings, and idle
//! disconnects.
//!
//! Verification command: `cargo test --test connection_lifecycle`

use std::sync::Arc;
use std::time::Duration;

use chatwire_proto::ChannelName;
use chatwire_proto::event::{self, ClientEvent, ServerEvent};
use chatwire_relay::config::RelayConfig;
use chatwire_relay::relay::{RelayState, start_server_with_state};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay with the given config on a random port.
async fn start_relay(config: &RelayConfig) -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::with_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

/// Config accepting every origin, otherwise defaults.
fn open_config() -> RelayConfig {
    RelayConfig {
        allowed_origins: Vec::new(),
        ..RelayConfig::default()
    }
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

/// Attempts an upgrade carrying an `Origin` header.
async fn connect_with_origin(
    addr: std::net::SocketAddr,
    origin: &str,
) -> Result<WsStream, tungstenite::Error> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", origin.parse().unwrap());
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(ws, _)| ws)
}

async fn send_event(ws: &mut WsStream, event: ClientEvent) {
    let text = event::encode_client(&event).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

/// Runs `setup` for `user` and waits for `connected`, skipping pings.
async fn setup(ws: &mut WsStream, user: &str) {
    send_event(ws, ClientEvent::Setup(json!({ "_id": user }))).await;
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timed out")
            .unwrap()
            .unwrap();
        match msg {
            tungstenite::Message::Text(text) => {
                let event = event::decode_server(text.as_bytes()).unwrap();
                assert_eq!(event, ServerEvent::Connected);
                return;
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Polls until the relay reports `expected` live connections.
async fn wait_for_connections(state: &RelayState, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.connection_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} connections, have {}",
            state.connection_count()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Health endpoint
// =============================================================================

#[tokio::test]
async fn health_endpoint_responds() {
    let (addr, _state) = start_relay(&RelayConfig::default()).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("health request timed out")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("chatwire relay is running"));
}

// =============================================================================
// Origin allow-list
// =============================================================================

#[tokio::test]
async fn disallowed_origin_is_rejected() {
    let (addr, state) = start_relay(&RelayConfig::default()).await;

    let Err(err) = connect_with_origin(addr, "http://evil.example").await else {
        panic!("upgrade should be refused");
    };
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 403),
        other => panic!("expected HTTP 403, got {other:?}"),
    }
    assert_eq!(state.connection_count(), 0);
}

#[tokio::test]
async fn allowed_origin_and_missing_origin_connect() {
    let (addr, state) = start_relay(&RelayConfig::default()).await;

    let mut browser = connect_with_origin(addr, "http://localhost:3000").await.unwrap();
    let mut native = connect(addr).await;
    setup(&mut browser, "u1").await;
    setup(&mut native, "u2").await;

    assert_eq!(state.connection_count(), 2);
}

// =============================================================================
// Disconnect cleanup
// =============================================================================

#[tokio::test]
async fn close_removes_every_subscription() {
    let (addr, state) = start_relay(&open_config()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    send_event(&mut alice, ClientEvent::JoinChat(json!("chat-1"))).await;
    setup(&mut alice, "alice").await;
    send_event(&mut bob, ClientEvent::JoinChat(json!("chat-1"))).await;
    setup(&mut bob, "bob").await;
    assert_eq!(state.channel_count(), 3);
    assert_eq!(state.subscriber_count(&ChannelName::from("chat-1")), 2);

    alice.close(None).await.unwrap();
    wait_for_connections(&state, 1).await;

    assert_eq!(state.channel_count(), 2);
    assert_eq!(state.subscriber_count(&ChannelName::from("chat-1")), 1);
    assert_eq!(state.subscriber_count(&ChannelName::from("alice")), 0);

    drop(bob);
    wait_for_connections(&state, 0).await;
    assert_eq!(state.channel_count(), 0);
}

// =============================================================================
// Frame limits
// =============================================================================

#[tokio::test]
async fn oversized_frame_is_dropped_and_connection_survives() {
    let config = RelayConfig {
        max_event_size: 128,
        ..open_config()
    };
    let (addr, state) = start_relay(&config).await;
    let mut ws = connect(addr).await;

    let room = "r".repeat(256);
    send_event(&mut ws, ClientEvent::JoinChat(json!(room))).await;
    setup(&mut ws, "u1").await;

    assert_eq!(state.channel_count(), 1);
    assert_eq!(state.subscriber_count(&ChannelName::from(room.as_str())), 0);
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    let (addr, state) = start_relay(&open_config()).await;
    let mut ws = connect(addr).await;

    ws.send(tungstenite::Message::Text("not json".into())).await.unwrap();
    ws.send(tungstenite::Message::Text(r#"{"event":"shout","data":1}"#.into()))
        .await
        .unwrap();
    setup(&mut ws, "u1").await;

    assert_eq!(state.connection_count(), 1);
}

// =============================================================================
// Keepalive
// =============================================================================

#[tokio::test]
async fn server_pings_on_interval() {
    let config = RelayConfig {
        ping_interval_secs: 1,
        ..open_config()
    };
    let (addr, _state) = start_relay(&config).await;
    let mut ws = connect(addr).await;

    let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .expect("no ping within interval")
        .unwrap()
        .unwrap();
    assert!(matches!(msg, tungstenite::Message::Ping(_)), "got {msg:?}");
}

#[tokio::test]
async fn responsive_client_outlives_idle_limit() {
    let config = RelayConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 1,
        ..open_config()
    };
    let (addr, state) = start_relay(&config).await;
    let mut ws = connect(addr).await;

    // Reading lets tungstenite answer every ping with a pong.
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(state.connection_count(), 1);
    reader.abort();
}

#[tokio::test]
async fn silent_client_is_disconnected() {
    let config = RelayConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 1,
        ..open_config()
    };
    let (addr, state) = start_relay(&config).await;

    // Never read: no pongs go back, so the relay hears nothing.
    let _ws = connect(addr).await;
    wait_for_connections(&state, 1).await;

    wait_for_connections(&state, 0).await;
}
