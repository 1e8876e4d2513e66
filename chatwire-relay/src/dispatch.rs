//! Inbound event dispatch.
//!
//! [`dispatch`] applies one client event to the subscription registry and
//! returns what must be sent, without doing any I/O. The relay state resolves
//! the instructions against the registry and performs the sends.

use chatwire_proto::payload::{self, MessageRouting, PayloadError};
use chatwire_proto::{ChannelName, ClientEvent, ServerEvent};
use serde_json::Value;

use crate::registry::{ConnectionId, SubscriptionRegistry};

/// A delivery produced by dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Send to the connection that triggered the event, and only to it.
    Reply(ServerEvent),
    /// Send to every subscriber of each target channel, except the
    /// connection that triggered the event.
    ///
    /// Targets are delivered independently, once per listed channel.
    Broadcast {
        /// Channels to deliver to.
        targets: Vec<ChannelName>,
        /// Event to deliver.
        event: ServerEvent,
    },
}

/// Reasons an inbound event is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The room identifier is not a string or number.
    #[error("room identifier does not name a channel: {0}")]
    InvalidRoom(Value),
    /// The `new message` payload cannot be routed.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Applies an inbound event from `conn` and returns the resulting deliveries.
///
/// # Errors
///
/// Returns [`DispatchError`] for malformed events. The registry is left
/// untouched in that case and nothing should be sent.
pub fn dispatch(
    registry: &mut SubscriptionRegistry,
    conn: ConnectionId,
    event: ClientEvent,
) -> Result<Vec<Instruction>, DispatchError> {
    match event {
        ClientEvent::Setup(user) => Ok(setup(registry, conn, &user)),
        ClientEvent::JoinChat(room) => {
            join_room(registry, conn, &room)?;
            Ok(Vec::new())
        }
        ClientEvent::Typing(room) => Ok(vec![to_room(&room, ServerEvent::Typing)?]),
        ClientEvent::StopTyping(room) => Ok(vec![to_room(&room, ServerEvent::StopTyping)?]),
        ClientEvent::NewMessage(message) => new_message(conn, message),
    }
}

/// Subscribes `conn` to its identity channel and acknowledges it.
///
/// A payload without a usable `_id` is ignored without a reply.
fn setup(registry: &mut SubscriptionRegistry, conn: ConnectionId, user: &Value) -> Vec<Instruction> {
    let Some(identity) = payload::setup_identity(user) else {
        tracing::debug!(conn_id = %conn, "setup without identity ignored");
        return Vec::new();
    };

    let added = registry.subscribe(conn, identity.clone());
    tracing::debug!(conn_id = %conn, identity = %identity, new = added, "identity channel joined");
    vec![Instruction::Reply(ServerEvent::Connected)]
}

fn join_room(
    registry: &mut SubscriptionRegistry,
    conn: ConnectionId,
    room: &Value,
) -> Result<(), DispatchError> {
    let channel =
        ChannelName::from_scalar(room).ok_or_else(|| DispatchError::InvalidRoom(room.clone()))?;
    registry.subscribe(conn, channel.clone());
    tracing::info!(conn_id = %conn, room = %channel, "user joined room");
    Ok(())
}

fn to_room(room: &Value, event: ServerEvent) -> Result<Instruction, DispatchError> {
    let channel =
        ChannelName::from_scalar(room).ok_or_else(|| DispatchError::InvalidRoom(room.clone()))?;
    Ok(Instruction::Broadcast {
        targets: vec![channel],
        event,
    })
}

/// Addresses `message` to the identity channel of every participant except
/// the sender.
fn new_message(conn: ConnectionId, message: Value) -> Result<Vec<Instruction>, DispatchError> {
    let routing = MessageRouting::from_payload(&message)?;

    let mut targets = Vec::with_capacity(routing.participant_count());
    for recipient in routing.recipients() {
        match recipient {
            Some(channel) => targets.push(channel),
            None => tracing::debug!(conn_id = %conn, "participant without usable _id skipped"),
        }
    }

    if targets.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Instruction::Broadcast {
        targets,
        event: ServerEvent::MessageReceived(message),
    }])
}
