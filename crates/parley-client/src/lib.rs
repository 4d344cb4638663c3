//! # parley-client
//!
//! The session layer of the Parley messenger: orchestrates startup, owns the
//! per-conversation projections and the in-memory contact view, routes
//! connection-manager events into the local store, and implements the
//! offline-send fallback. A presentation layer consumes the typed
//! [`SessionEvent`] stream; nothing in this crate renders anything.

pub mod contacts;
pub mod conversation;
pub mod directory;
pub mod events;
pub mod session;

mod error;

use tracing_subscriber::{fmt, EnvFilter};

pub use contacts::ContactBook;
pub use conversation::ConversationCache;
pub use directory::{Directory, DirectoryError, HttpDirectory, MemoryDirectory, PeerLocation};
pub use error::SessionError;
pub use events::SessionEvent;
pub use session::{Session, SessionHandle, SendOutcome};

/// Initialise the global tracing subscriber.
///
/// Honours `RUST_LOG`; defaults to debug for the Parley crates and warn for
/// everything else.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
