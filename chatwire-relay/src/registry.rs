//! Subscription registry for the relay server.
//!
//! A bidirectional index between live connections and the channels they
//! subscribe to. Channels have no lifecycle of their own: a channel exists
//! while it has at least one subscriber and is dropped with its last one.
//!
//! The registry itself is not synchronized; [`crate::relay::RelayState`]
//! guards it together with the outbound queues.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chatwire_proto::ChannelName;
use uuid::Uuid;

/// Opaque identifier of one live connection, assigned on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh, time-ordered connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection ↔ channel subscription graph.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Connection → channels it is subscribed to.
    by_connection: HashMap<ConnectionId, HashSet<ChannelName>>,
    /// Channel → subscribed connections. Never holds an empty set.
    by_channel: HashMap<ChannelName, HashSet<ConnectionId>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a connection that has no subscriptions yet.
    ///
    /// Returns `false` if the connection was already tracked.
    pub fn add_connection(&mut self, conn: ConnectionId) -> bool {
        if self.by_connection.contains_key(&conn) {
            return false;
        }
        self.by_connection.insert(conn, HashSet::new());
        true
    }

    /// Returns `true` if the connection is tracked.
    #[must_use]
    pub fn contains_connection(&self, conn: ConnectionId) -> bool {
        self.by_connection.contains_key(&conn)
    }

    /// Subscribes a connection to a channel.
    ///
    /// Returns `true` if the subscription is new. Subscribing twice is a
    /// no-op, so a channel never delivers twice to the same connection.
    pub fn subscribe(&mut self, conn: ConnectionId, channel: ChannelName) -> bool {
        let added = self
            .by_connection
            .entry(conn)
            .or_default()
            .insert(channel.clone());
        if added {
            self.by_channel.entry(channel).or_default().insert(conn);
        }
        added
    }

    /// Removes a connection and every subscription it holds.
    ///
    /// Returns the channels it was subscribed to. Channels left without
    /// subscribers are dropped.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Vec<ChannelName> {
        let Some(channels) = self.by_connection.remove(&conn) else {
            return Vec::new();
        };

        for channel in &channels {
            if let Some(subscribers) = self.by_channel.get_mut(channel) {
                subscribers.remove(&conn);
                if subscribers.is_empty() {
                    self.by_channel.remove(channel);
                }
            }
        }

        channels.into_iter().collect()
    }

    /// Iterates over the connections subscribed to a channel.
    ///
    /// Unknown channels yield nothing.
    pub fn subscribers<'a>(
        &'a self,
        channel: &ChannelName,
    ) -> impl Iterator<Item = ConnectionId> + use<'a> {
        self.by_channel
            .get(channel)
            .into_iter()
            .flat_map(|subscribers| subscribers.iter().copied())
    }

    /// Returns the number of connections subscribed to a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.by_channel.get(channel).map_or(0, HashSet::len)
    }

    /// Returns `true` if the connection is subscribed to the channel.
    #[must_use]
    pub fn is_subscribed(&self, conn: ConnectionId, channel: &ChannelName) -> bool {
        self.by_connection
            .get(&conn)
            .is_some_and(|channels| channels.contains(channel))
    }

    /// Returns the channels a connection is subscribed to, sorted by name.
    #[must_use]
    pub fn channels_of(&self, conn: ConnectionId) -> Vec<ChannelName> {
        let mut channels: Vec<ChannelName> = self
            .by_connection
            .get(&conn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.by_channel.len()
    }
}
