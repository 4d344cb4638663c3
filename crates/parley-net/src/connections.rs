//! Live connection tracking.
//!
//! [`ConnectionTable`] owns the set of live connections, keyed by the
//! remote's transient address (the remote username is unknown until its
//! introduction frame arrives). Every state transition goes through one of
//! the named methods here, so the one-live-connection-per-address invariant
//! has a single enforcement point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::Address;

/// Lifecycle of one connection. `Closed` is terminal: a closed connection
/// is removed from the table and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why a connection left the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by a local `close()` call.
    Local,
    /// The remote end closed the channel.
    Remote,
    /// Channel-level failure, including a connect timeout.
    TransportFault,
    /// The manager is shutting down.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "closed locally"),
            Self::Remote => write!(f, "closed by peer"),
            Self::TransportFault => write!(f, "transport fault"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Snapshot of one live connection, for observers.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub address: Address,
    /// `None` until the remote's introduction arrived.
    pub username: Option<String>,
    pub state: ConnectionState,
    pub opened_at: Option<DateTime<Utc>>,
}

struct Entry {
    state: ConnectionState,
    username: Option<String>,
    opened_at: Option<DateTime<Utc>>,
    /// Outbound half of the channel; present once `Open`.
    outbound: Option<mpsc::Sender<Vec<u8>>>,
}

/// Tracks all live connections.
#[derive(Default)]
pub struct ConnectionTable {
    entries: HashMap<Address, Entry>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in `Connecting` state.
    ///
    /// Returns `false` (and changes nothing) when a live connection already
    /// exists for the address; duplicate dials are a no-op.
    pub fn begin_connecting(&mut self, address: &Address) -> bool {
        if self.entries.contains_key(address) {
            debug!(%address, "duplicate connect ignored");
            return false;
        }
        self.entries.insert(
            address.clone(),
            Entry {
                state: ConnectionState::Connecting,
                username: None,
                opened_at: None,
                outbound: None,
            },
        );
        true
    }

    /// Transition `Connecting -> Open`, storing the outbound channel half.
    ///
    /// Returns `false` when there is no `Connecting` entry for the address
    /// (e.g. it was closed while the dial was in flight).
    pub fn mark_open(&mut self, address: &Address, outbound: mpsc::Sender<Vec<u8>>) -> bool {
        match self.entries.get_mut(address) {
            Some(entry) if entry.state == ConnectionState::Connecting => {
                entry.state = ConnectionState::Open;
                entry.opened_at = Some(Utc::now());
                entry.outbound = Some(outbound);
                debug!(%address, "connection open");
                true
            }
            _ => false,
        }
    }

    /// Record the username the peer introduced itself with.
    pub fn set_username(&mut self, address: &Address, username: &str) -> bool {
        match self.entries.get_mut(address) {
            Some(entry) => {
                entry.username = Some(username.to_string());
                true
            }
            None => false,
        }
    }

    /// Close a connection: remove it from the live set.
    ///
    /// Dropping the outbound half lets the remote observe the close. Returns
    /// `false` when the address had no live connection.
    pub fn close(&mut self, address: &Address) -> bool {
        if self.entries.remove(address).is_some() {
            debug!(%address, "connection removed from live set");
            return true;
        }
        false
    }

    /// Outbound channel half, present only for `Open` connections.
    pub fn outbound(&self, address: &Address) -> Option<mpsc::Sender<Vec<u8>>> {
        self.entries
            .get(address)
            .and_then(|entry| entry.outbound.clone())
    }

    pub fn state(&self, address: &Address) -> Option<ConnectionState> {
        self.entries.get(address).map(|entry| entry.state)
    }

    pub fn username(&self, address: &Address) -> Option<String> {
        self.entries.get(address).and_then(|e| e.username.clone())
    }

    /// Whether the address has a live (`Connecting` or `Open`) connection.
    pub fn is_live(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot every live connection.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.entries
            .iter()
            .map(|(address, entry)| ConnectionInfo {
                address: address.clone(),
                username: entry.username.clone(),
                state: entry.state,
                opened_at: entry.opened_at,
            })
            .collect()
    }

    /// Remove and return every live address (shutdown path).
    pub fn drain(&mut self) -> Vec<Address> {
        self.entries.drain().map(|(address, _)| address).collect()
    }
}
