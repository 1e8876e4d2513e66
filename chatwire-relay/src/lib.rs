//! `chatwire` relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, tracks which identity and room
//! channels each connection subscribes to, and fans typing indicators and
//! chat messages out to the other subscribers.

pub mod config;
pub mod dispatch;
pub mod registry;
pub mod relay;
