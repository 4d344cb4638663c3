//! # parley-shared
//!
//! Types shared between the networking, storage and session layers: the wire
//! protocol frames, the transient address / local identity types, protocol
//! constants and the protocol error enum.
//!
//! This crate is pure data: no I/O, no async.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::ProtocolViolation;
pub use protocol::{Attachment, ChatFrame, Frame, Introduction};
pub use types::{Address, LocalIdentity};
