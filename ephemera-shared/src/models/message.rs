use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

/// Opaque message identifier. Doubles as the backfill pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(ChannelId);
string_id!(MessageId);

/// A chat message as seen by the expiry engine.
///
/// Deserializes from both REST history pages and `MESSAGE_CREATE` dispatch
/// payloads; every other field of those objects is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Owning channel.
    pub channel_id: ChannelId,
    /// Creation time.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}
