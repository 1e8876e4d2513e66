//! Channel names.
//!
//! Identity channels (named after a user id) and room channels (named after a
//! chat id) share one addressing space, so both are plain [`ChannelName`]s.

use std::fmt;
use std::num::FpCategory;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of a broadcast group connections can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Creates a channel name from any string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives a channel name from a JSON scalar.
    ///
    /// Strings are used verbatim and numbers by their decimal text. `null`,
    /// booleans, arrays and objects do not name a channel.
    #[must_use]
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Derives an identity channel name from a user id.
    ///
    /// Stricter than [`Self::from_scalar`]: an empty string or a zero number
    /// counts as no identity at all.
    #[must_use]
    pub fn identity(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s.is_empty() => None,
            Value::Number(n) if n.as_f64().is_some_and(|f| f.classify() == FpCategory::Zero) => {
                None
            }
            other => Self::from_scalar(other),
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        Self(name)
    }
}
