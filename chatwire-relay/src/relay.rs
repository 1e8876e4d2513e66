//! Relay server core: shared state, WebSocket handler, and event fan-out.
//!
//! Every accepted WebSocket becomes a connection in the [`RelayState`]
//! registry. Inbound frames are decoded into client events, dispatched
//! against the registry, and the resulting deliveries are pushed onto the
//! outbound queues of the target connections. Delivery is best-effort: no
//! queuing for absent users and no acknowledgments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chatwire_proto::event::{self, ClientEvent, ServerEvent};
use chatwire_proto::ChannelName;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::dispatch::{self, DispatchError, Instruction};
use crate::registry::{ConnectionId, SubscriptionRegistry};

/// Default maximum accepted inbound frame size in bytes.
const DEFAULT_MAX_EVENT_SIZE: usize = 1_000_000;

/// Text served on `GET /`.
const HEALTH_TEXT: &str = "chatwire relay is running";

/// Keepalive timing for live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// How often the server pings each client.
    pub interval: Duration,
    /// Extra grace period after a missed ping before the connection is dropped.
    pub timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Keepalive {
    /// Longest silence tolerated from a client before it is disconnected.
    #[must_use]
    pub const fn idle_limit(&self) -> Duration {
        self.interval.saturating_add(self.timeout)
    }
}

/// Registry plus the outbound queue of every live connection.
///
/// Kept behind one lock so that a broadcast never observes a connection that
/// is half subscribed or half removed.
#[derive(Default)]
struct Hub {
    registry: SubscriptionRegistry,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl Hub {
    /// Performs one instruction on behalf of `origin`, returning the number of
    /// send attempts.
    fn deliver(&self, origin: ConnectionId, instruction: Instruction) -> usize {
        match instruction {
            Instruction::Reply(event) => {
                let Some(msg) = encode_message(&event) else {
                    return 0;
                };
                self.send(origin, msg);
                1
            }
            Instruction::Broadcast { targets, event } => {
                let Some(msg) = encode_message(&event) else {
                    return 0;
                };
                let mut attempts = 0;
                for channel in &targets {
                    for target in self.registry.subscribers(channel) {
                        if target == origin {
                            continue;
                        }
                        self.send(target, msg.clone());
                        attempts += 1;
                    }
                }
                tracing::debug!(
                    from = %origin,
                    event = event.name(),
                    channels = targets.len(),
                    attempts = attempts,
                    "broadcast"
                );
                attempts
            }
        }
    }

    /// Queues a frame for one connection. Failures only affect that
    /// connection.
    fn send(&self, target: ConnectionId, msg: Message) {
        match self.outboxes.get(&target) {
            Some(outbox) => {
                if outbox.send(msg).is_err() {
                    tracing::debug!(conn_id = %target, "outbox closed, delivery dropped");
                }
            }
            None => tracing::debug!(conn_id = %target, "no outbox for subscriber"),
        }
    }
}

/// Shared relay server state: subscription registry, outbound queues, and
/// connection limits.
pub struct RelayState {
    hub: Mutex<Hub>,
    /// Maximum accepted inbound frame size in bytes.
    max_event_size: usize,
    keepalive: Keepalive,
    /// Browser origins allowed to open a WebSocket. Empty allows all.
    allowed_origins: Vec<String>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates an empty relay state with default limits that accepts every
    /// origin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hub: Mutex::new(Hub::default()),
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
            keepalive: Keepalive::default(),
            allowed_origins: Vec::new(),
        }
    }

    /// Creates an empty relay state using the limits of a resolved config.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            hub: Mutex::new(Hub::default()),
            max_event_size: config.max_event_size,
            keepalive: Keepalive {
                interval: Duration::from_secs(config.ping_interval_secs.max(1)),
                timeout: Duration::from_secs(config.ping_timeout_secs),
            },
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    /// Keepalive timing applied to every connection.
    #[must_use]
    pub const fn keepalive(&self) -> Keepalive {
        self.keepalive
    }

    /// Maximum accepted inbound frame size in bytes.
    #[must_use]
    pub const fn max_event_size(&self) -> usize {
        self.max_event_size
    }

    /// Registers a new connection whose outbound frames go to `outbox`.
    pub fn connect(&self, outbox: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let conn = ConnectionId::new();
        let mut hub = self.hub.lock();
        hub.registry.add_connection(conn);
        hub.outboxes.insert(conn, outbox);
        conn
    }

    /// Removes a connection and all of its subscriptions.
    ///
    /// Returns the channels it was subscribed to.
    pub fn disconnect(&self, conn: ConnectionId) -> Vec<ChannelName> {
        let mut hub = self.hub.lock();
        hub.outboxes.remove(&conn);
        hub.registry.remove_connection(conn)
    }

    /// Dispatches one client event from `conn` and performs the deliveries.
    ///
    /// Returns the number of send attempts made.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for malformed events; nothing is sent then.
    pub fn handle_event(&self, conn: ConnectionId, event: ClientEvent) -> Result<usize, DispatchError> {
        let mut hub = self.hub.lock();
        let instructions = dispatch::dispatch(&mut hub.registry, conn, event)?;
        let attempts: usize = instructions
            .into_iter()
            .map(|instruction| hub.deliver(conn, instruction))
            .sum();
        drop(hub);
        Ok(attempts)
    }

    /// Decodes and handles one raw inbound frame.
    ///
    /// Oversized, undecodable, and malformed frames are logged and dropped;
    /// nothing is reported back to the client.
    pub fn handle_frame(&self, conn: ConnectionId, bytes: &[u8]) {
        if bytes.len() > self.max_event_size {
            tracing::warn!(
                conn_id = %conn,
                size = bytes.len(),
                max = self.max_event_size,
                "frame exceeds size limit, dropped"
            );
            return;
        }

        let event = match event::decode_client(bytes) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(conn_id = %conn, error = %e, "failed to decode frame");
                return;
            }
        };

        let name = event.name();
        match self.handle_event(conn, event) {
            Ok(attempts) => {
                tracing::debug!(conn_id = %conn, event = name, attempts = attempts, "event handled");
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn, event = name, error = %e, "malformed event dropped");
            }
        }
    }

    /// Returns `true` if a WebSocket upgrade with this `Origin` header may
    /// proceed. Requests without an origin are not from browsers and are
    /// always accepted.
    #[must_use]
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        origin.is_none_or(|origin| {
            self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|a| a == origin)
        })
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.lock().registry.connection_count()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.hub.lock().registry.channel_count()
    }

    /// Number of connections subscribed to a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.hub.lock().registry.subscriber_count(channel)
    }

    /// Channels a connection is subscribed to, sorted by name.
    #[must_use]
    pub fn channels_of(&self, conn: ConnectionId) -> Vec<ChannelName> {
        self.hub.lock().registry.channels_of(conn)
    }

    /// Send a WebSocket Close frame to every live connection.
    ///
    /// Each writer task forwards the close frame and stops, which ends the
    /// connection and its subscriptions. Used for graceful shutdown.
    pub fn close_all_connections(&self) {
        let hub = self.hub.lock();
        for (conn, outbox) in &hub.outboxes {
            tracing::info!(conn_id = %conn, "sending close frame");
            let _ = outbox.send(Message::Close(None));
        }
    }
}

/// Encodes a server event as a text frame.
fn encode_message(event: &ServerEvent) -> Option<Message> {
    match event::encode_server(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "failed to encode server event");
            None
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Register the connection (no subscriptions yet).
/// 2. Spawn a writer task draining the connection's outbound queue and
///    pinging the client on the keepalive interval.
/// 3. Read frames in order and handle each one before the next.
/// 4. When either side stops, or the client goes silent past the idle limit,
///    drop the connection and all of its subscriptions.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.connect(tx);
    tracing::info!(conn_id = %conn_id, "client connected");

    let keepalive = state.keepalive();

    let mut write_task = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + keepalive.interval;
        let mut ping = tokio::time::interval_at(start, keepalive.interval);
        loop {
            let msg = tokio::select! {
                next = rx.recv() => match next {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let idle_limit = keepalive.idle_limit();
    let mut read_task = tokio::spawn(async move {
        loop {
            let Ok(next) = tokio::time::timeout(idle_limit, ws_receiver.next()).await else {
                tracing::info!(conn_id = %conn_id, "client idle past keepalive limit");
                break;
            };
            let Some(Ok(msg)) = next else {
                break;
            };
            match msg {
                Message::Text(text) => reader_state.handle_frame(conn_id, text.as_str().as_bytes()),
                Message::Binary(data) => reader_state.handle_frame(conn_id, &data),
                Message::Close(_) => {
                    tracing::info!(conn_id = %conn_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    let dropped = state.disconnect(conn_id);
    tracing::info!(
        conn_id = %conn_id,
        channels = dropped.len(),
        "client disconnected"
    );
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to build the state from a resolved
/// [`RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(health))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

async fn health() -> &'static str {
    HEALTH_TEXT
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !state.is_origin_allowed(origin) {
        tracing::warn!(origin = ?origin, "rejected upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}
