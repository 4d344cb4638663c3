//! Wire protocol frames exchanged between two peers over a channel.
//!
//! The transport already delivers discrete objects, so frames are structured
//! JSON values rather than a length-prefixed byte format. Exactly two frame
//! kinds exist: the one-shot [`Introduction`] sent by each side immediately
//! after its channel opens, and the [`ChatFrame`] carrying one message.
//!
//! Decoding is fail-soft: peers are untrusted, so an unknown or malformed
//! frame yields a [`ProtocolViolation`] for the caller to log and
//! drop; it never tears down the connection.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_ATTACHMENT_SIZE;
use crate::error::ProtocolViolation;
use crate::types::Address;

/// All frames carried on a peer channel, tagged by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Frame {
    /// Handshake frame binding the sender's address to its username.
    #[serde(rename = "introduction")]
    Introduction(Introduction),

    /// One chat message.
    #[serde(rename = "message")]
    Chat(ChatFrame),
}

/// Sent exactly once per side, immediately after the channel reaches the
/// open state. There is no acknowledgment; the handshake is one-shot and
/// unidirectional per side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Introduction {
    /// The sender's stable username.
    pub username: String,
    /// The sender's current transient acceptor address.
    pub address: Address,
}

/// Carries one message's payload. The recipient is implicit (the local
/// identity) and the conversation key is derived from `from`, so neither is
/// on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFrame {
    pub from: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// File attachment riding on a [`ChatFrame`], payload encoded as a base64
/// data URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// `data:<mime>;base64,<payload>`
    pub payload: String,
}

impl Frame {
    /// Serialize to the JSON wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolViolation> {
        serde_json::to_vec(self).map_err(|e| ProtocolViolation::Encode(e.to_string()))
    }

    /// Deserialize and validate a received frame.
    ///
    /// Decoding is staged so the caller gets a precise violation: invalid
    /// JSON, a missing or unknown `type` tag, or a known tag with missing
    /// required fields.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolViolation> {
        let value: serde_json::Value =
            serde_json::from_slice(data).map_err(|_| ProtocolViolation::NotJson)?;

        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolViolation::MissingType)?;

        let kind: &'static str = match tag {
            "introduction" => "introduction",
            "message" => "message",
            other => return Err(ProtocolViolation::UnknownType(other.to_string())),
        };

        serde_json::from_value(value).map_err(|e| ProtocolViolation::Malformed {
            kind,
            detail: e.to_string(),
        })
    }
}

impl Attachment {
    /// Build an attachment from raw file bytes, encoding the payload as a
    /// base64 data URI.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        let mime_type = mime_type.into();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            name: name.into(),
            payload: format!("data:{mime_type};base64,{encoded}"),
            mime_type,
            size_bytes: bytes.len() as u64,
        }
    }

    /// Recover the raw file bytes from the data-URI payload.
    ///
    /// Receivers must accept whatever arrives, so a bare base64 string
    /// (no `data:` prefix) is tolerated too.
    pub fn decode_payload(&self) -> Result<Vec<u8>, ProtocolViolation> {
        let encoded = match self.payload.split_once(',') {
            Some((_prefix, rest)) => rest,
            None => self.payload.as_str(),
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ProtocolViolation::Malformed {
                kind: "attachment",
                detail: e.to_string(),
            })
    }

    /// Sender-side size policy. The receiver never re-validates.
    pub fn check_size(&self) -> Result<(), ProtocolViolation> {
        if self.size_bytes > MAX_ATTACHMENT_SIZE {
            return Err(ProtocolViolation::AttachmentTooLarge {
                size_bytes: self.size_bytes,
                limit: MAX_ATTACHMENT_SIZE,
            });
        }
        Ok(())
    }
}
