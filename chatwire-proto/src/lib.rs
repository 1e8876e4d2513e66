//! Shared wire vocabulary for the `chatwire` relay.
//!
//! Events travel as JSON frames `{"event": "<name>", "data": <json>}` over
//! WebSocket. Event names are fixed for compatibility with existing chat
//! clients.

pub mod channel;
pub mod event;
pub mod payload;

pub use channel::ChannelName;
pub use event::{ClientEvent, CodecError, Frame, ServerEvent};
