//! Typed events the session emits to the presentation layer.
//!
//! Delivered over an mpsc channel in the order the session observed them;
//! the UI subscribes once at startup and renders from these alone.

use parley_net::CloseReason;
use parley_shared::Address;
use parley_store::{Contact, Message};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A connection reached the open state (handshake still pending).
    PeerConnected { address: Address },

    /// A connection left the live set.
    PeerDisconnected { address: Address, reason: CloseReason },

    /// A handshake completed and the contact was created or refreshed.
    ContactUpdated { contact: Contact },

    /// An inbound message was validated and persisted.
    MessageReceived { message: Message },

    /// A send found no open connection; the message was stored locally and
    /// the peer should be shown as offline.
    PeerOffline { username: String },

    /// A store write failed; the affected data is not durable.
    StorageFault { context: String },
}
