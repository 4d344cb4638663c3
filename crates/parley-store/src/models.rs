//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a presentation layer and reused verbatim in backup snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::Address;
use parley_shared::Attachment;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned monotonically increasing sequence id.
    /// `None` until the message has been appended.
    pub seq: Option<i64>,
    /// The remote party's username; groups messages into a conversation.
    pub conversation_key: String,
    /// Username of the sender.
    pub sender: String,
    /// Username of the recipient.
    pub recipient: String,
    /// Message text.
    pub content: String,
    /// When the message was sent (as reported by the sender).
    pub timestamp: DateTime<Utc>,
    /// Optional file attachment.
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Derive the conversation key: whichever of `from`/`to` is not the
    /// local username.
    pub fn conversation_key_for(local_username: &str, from: &str, to: &str) -> String {
        if from == local_username {
            to.to_string()
        } else {
            from.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A known peer. The primary key is the durable username.
///
/// The stored address is merely the last one observed; peers get a fresh
/// transient address every session, so the directory service is the ground
/// truth for reachability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub username: String,
    pub address: Address,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Setting
// ---------------------------------------------------------------------------

/// One row of the string-keyed settings collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_the_remote_party() {
        assert_eq!(Message::conversation_key_for("alice", "alice", "bob"), "bob");
        assert_eq!(Message::conversation_key_for("alice", "bob", "alice"), "bob");
    }
}
