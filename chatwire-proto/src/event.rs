//! Event frames exchanged between chat clients and the relay.
//!
//! Every WebSocket frame is a JSON [`Frame`]. Inbound frames decode into a
//! [`ClientEvent`], outbound ones are produced from a [`ServerEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound: a client announces its user identity.
pub const SETUP: &str = "setup";
/// Outbound: acknowledgment of `setup`.
pub const CONNECTED: &str = "connected";
/// Inbound: a client joins a room channel.
pub const JOIN_CHAT: &str = "join chat";
/// Both directions: someone started typing in a room.
pub const TYPING: &str = "typing";
/// Both directions: someone stopped typing in a room.
pub const STOP_TYPING: &str = "stop typing";
/// Inbound: a client posted a chat message.
pub const NEW_MESSAGE: &str = "new message";
/// Outbound: a chat message delivered to a participant.
pub const MESSAGE_RECEIVED: &str = "message received";

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not have the frame shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame names an event outside the vocabulary.
    #[error("unknown event: {0:?}")]
    UnknownEvent(String),
}

/// A single JSON frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name, e.g. `"new message"`.
    pub event: String,
    /// Event payload. Absent for payload-less events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Events sent by a client to the relay.
///
/// Payloads stay raw JSON: the relay interprets only the fields it routes on
/// and forwards the rest untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// `setup` with the user object (`{ _id }`).
    Setup(Value),
    /// `join chat` with a room identifier.
    JoinChat(Value),
    /// `typing` with a room identifier.
    Typing(Value),
    /// `stop typing` with a room identifier.
    StopTyping(Value),
    /// `new message` with the full message object.
    NewMessage(Value),
}

impl ClientEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => SETUP,
            Self::JoinChat(_) => JOIN_CHAT,
            Self::Typing(_) => TYPING,
            Self::StopTyping(_) => STOP_TYPING,
            Self::NewMessage(_) => NEW_MESSAGE,
        }
    }

    /// Builds a client event from a decoded frame.
    ///
    /// A missing `data` field becomes JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownEvent`] for names outside the inbound
    /// vocabulary.
    pub fn from_frame(frame: Frame) -> Result<Self, CodecError> {
        let data = frame.data.unwrap_or(Value::Null);
        match frame.event.as_str() {
            SETUP => Ok(Self::Setup(data)),
            JOIN_CHAT => Ok(Self::JoinChat(data)),
            TYPING => Ok(Self::Typing(data)),
            STOP_TYPING => Ok(Self::StopTyping(data)),
            NEW_MESSAGE => Ok(Self::NewMessage(data)),
            _ => Err(CodecError::UnknownEvent(frame.event)),
        }
    }

    /// Converts this event into its wire frame.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        let event = self.name().to_string();
        let data = match self {
            Self::Setup(v)
            | Self::JoinChat(v)
            | Self::Typing(v)
            | Self::StopTyping(v)
            | Self::NewMessage(v) => v,
        };
        Frame {
            event,
            data: Some(data),
        }
    }
}

/// Events sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Acknowledges `setup` to the caller only.
    Connected,
    /// Someone else in the room started typing.
    Typing,
    /// Someone else in the room stopped typing.
    StopTyping,
    /// A message for this user, carrying the sender's payload unmodified.
    MessageReceived(Value),
}

impl ServerEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => CONNECTED,
            Self::Typing => TYPING,
            Self::StopTyping => STOP_TYPING,
            Self::MessageReceived(_) => MESSAGE_RECEIVED,
        }
    }

    /// Converts this event into its wire frame.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        let event = self.name().to_string();
        let data = match self {
            Self::MessageReceived(payload) => Some(payload),
            Self::Connected | Self::Typing | Self::StopTyping => None,
        };
        Frame { event, data }
    }

    /// Builds a server event from a decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownEvent`] for names outside the outbound
    /// vocabulary.
    pub fn from_frame(frame: Frame) -> Result<Self, CodecError> {
        match frame.event.as_str() {
            CONNECTED => Ok(Self::Connected),
            TYPING => Ok(Self::Typing),
            STOP_TYPING => Ok(Self::StopTyping),
            MESSAGE_RECEIVED => Ok(Self::MessageReceived(frame.data.unwrap_or(Value::Null))),
            _ => Err(CodecError::UnknownEvent(frame.event)),
        }
    }
}

/// Decodes an inbound frame from raw bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a JSON frame or name an
/// unknown event.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, CodecError> {
    let frame: Frame = serde_json::from_slice(bytes)?;
    ClientEvent::from_frame(frame)
}

/// Encodes a client event as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&event.clone().into_frame())?)
}

/// Encodes a server event as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&event.clone().into_frame())?)
}

/// Decodes an outbound frame from raw bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a JSON frame or name an
/// unknown event.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    let frame: Frame = serde_json::from_slice(bytes)?;
    ServerEvent::from_frame(frame)
}
