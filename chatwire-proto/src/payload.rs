//! Read-only views over inbound payloads.
//!
//! The relay never rewrites payloads. These helpers only pull out the fields
//! used for addressing.

use serde_json::Value;

use crate::channel::ChannelName;

/// Reasons a `new message` payload cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// `chat` or `chat.users` is absent or null.
    #[error("chat.users not defined")]
    MissingParticipants,
    /// `chat.users` is present but not a list.
    #[error("chat.users is not a list")]
    ParticipantsNotAList,
    /// `sender._id` is absent or null.
    #[error("sender._id not defined")]
    MissingSender,
}

/// Returns the identity channel named by a `setup` payload, if any.
#[must_use]
pub fn setup_identity(user: &Value) -> Option<ChannelName> {
    user.get("_id").and_then(ChannelName::identity)
}

/// Addressing view of a `new message` payload.
#[derive(Debug, Clone, Copy)]
pub struct MessageRouting<'a> {
    sender: &'a Value,
    participants: &'a [Value],
}

impl<'a> MessageRouting<'a> {
    /// Extracts the sender id and participant list from a message payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] when the participant list or the sender id is
    /// missing.
    pub fn from_payload(payload: &'a Value) -> Result<Self, PayloadError> {
        let users = payload
            .get("chat")
            .and_then(|chat| chat.get("users"))
            .filter(|users| !users.is_null())
            .ok_or(PayloadError::MissingParticipants)?;
        let participants = users
            .as_array()
            .ok_or(PayloadError::ParticipantsNotAList)?;
        let sender = payload
            .get("sender")
            .and_then(|sender| sender.get("_id"))
            .filter(|id| !id.is_null())
            .ok_or(PayloadError::MissingSender)?;

        Ok(Self {
            sender,
            participants: participants.as_slice(),
        })
    }

    /// The sender's raw `_id`.
    #[must_use]
    pub const fn sender(&self) -> &'a Value {
        self.sender
    }

    /// Number of entries in `chat.users`, sender included.
    #[must_use]
    pub const fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Identity channels of every participant other than the sender, in list
    /// order.
    ///
    /// Participants are compared to the sender by their raw `_id` value. A
    /// participant whose `_id` does not name a channel yields `None`.
    pub fn recipients(self) -> impl Iterator<Item = Option<ChannelName>> + 'a {
        let sender = self.sender;
        self.participants.iter().filter_map(move |user| {
            let id = user.get("_id");
            if id == Some(sender) {
                return None;
            }
            Some(id.and_then(ChannelName::from_scalar))
        })
    }
}
