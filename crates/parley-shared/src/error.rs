use thiserror::Error;

/// A received or outgoing frame that violates the wire protocol.
///
/// Violations on inbound frames are never fatal to a connection: the frame
/// is dropped, a warning is logged, and the session continues.
#[derive(Error, Debug)]
pub enum ProtocolViolation {
    /// The payload is not valid JSON.
    #[error("frame is not valid JSON")]
    NotJson,

    /// The payload has no `type` tag.
    #[error("frame has no \"type\" tag")]
    MissingType,

    /// The `type` tag is not one of the known frame kinds.
    #[error("unknown frame type {0:?}")]
    UnknownType(String),

    /// Known frame kind, but required fields are missing or mistyped.
    #[error("malformed {kind} frame: {detail}")]
    Malformed { kind: &'static str, detail: String },

    /// Attachment exceeds the sender-side size limit.
    #[error("attachment of {size_bytes} bytes exceeds the {limit}-byte limit")]
    AttachmentTooLarge { size_bytes: u64, limit: u64 },

    /// An outgoing frame failed to serialize.
    #[error("frame serialization failed: {0}")]
    Encode(String),
}
