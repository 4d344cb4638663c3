use thiserror::Error;

use parley_net::NetError;
use parley_shared::ProtocolViolation;
use parley_store::StoreError;

use crate::directory::DirectoryError;

/// Errors surfaced by session operations.
///
/// Nothing here is process-fatal: connectivity errors are user-visible
/// notices, storage write failures tell the caller the data is not durable,
/// and read failures are degraded to empty results before they ever reach
/// this type.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The username is not in the contact book.
    #[error("no contact named {0:?}")]
    UnknownContact(String),

    /// The session task is no longer running.
    #[error("session is not running")]
    Closed,
}
