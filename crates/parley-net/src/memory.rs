//! In-process transport for tests and local development.
//!
//! A [`MemoryHub`] plays the role of the network: every endpoint registers
//! an accept queue under its assigned address, and `open(address)` creates a
//! channel pair, handing one end to the target's queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use parley_shared::constants::CHANNEL_BUFFER;
use parley_shared::Address;

use crate::channel::{Channel, Transport, TransportError};

type Registry = Arc<Mutex<HashMap<Address, mpsc::Sender<Channel>>>>;

/// Shared fabric connecting any number of [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    registry: Registry,
    next_id: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint with a hub-assigned transient address.
    pub fn endpoint(&self) -> MemoryTransport {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.endpoint_at(Address::new(format!("mem-{id}")))
    }

    /// Create an endpoint at an explicit address (tests).
    pub fn endpoint_at(&self, address: Address) -> MemoryTransport {
        let (accept_tx, accept_rx) = mpsc::channel(CHANNEL_BUFFER);
        self.registry
            .lock()
            .expect("memory hub registry lock poisoned")
            .insert(address.clone(), accept_tx);

        MemoryTransport {
            local: address,
            registry: self.registry.clone(),
            incoming: tokio::sync::Mutex::new(accept_rx),
        }
    }

    /// Deregister an address, as if that peer went offline.
    pub fn disconnect(&self, address: &Address) {
        self.registry
            .lock()
            .expect("memory hub registry lock poisoned")
            .remove(address);
    }
}

/// One endpoint of the in-process fabric.
pub struct MemoryTransport {
    local: Address,
    registry: Registry,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Channel>>,
}

impl Transport for MemoryTransport {
    async fn open(&self, address: &Address) -> Result<Channel, TransportError> {
        let acceptor = self
            .registry
            .lock()
            .expect("memory hub registry lock poisoned")
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.clone()))?;

        let (ours, theirs) = Channel::pair(self.local.clone(), address.clone());
        acceptor
            .send(theirs)
            .await
            .map_err(|_| TransportError::Unreachable(address.clone()))?;

        Ok(ours)
    }

    async fn accept(&self) -> Option<Channel> {
        self.incoming.lock().await.recv().await
    }

    fn local_address(&self) -> Address {
        self.local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_hands_a_channel_to_the_acceptor() {
        let hub = MemoryHub::new();
        let alice = hub.endpoint_at(Address::new("addr-a"));
        let bob = hub.endpoint_at(Address::new("addr-b"));

        let to_bob = alice.open(&Address::new("addr-b")).await.unwrap();
        let mut at_bob = bob.accept().await.unwrap();

        assert_eq!(to_bob.remote(), &Address::new("addr-b"));
        assert_eq!(at_bob.remote(), &Address::new("addr-a"));

        to_bob.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(at_bob.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn open_to_unknown_address_is_unreachable() {
        let hub = MemoryHub::new();
        let alice = hub.endpoint();

        let result = alice.open(&Address::new("nowhere")).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn disconnect_makes_an_address_unreachable() {
        let hub = MemoryHub::new();
        let alice = hub.endpoint();
        let bob = hub.endpoint();

        let bob_addr = bob.local_address();
        assert!(alice.open(&bob_addr).await.is_ok());

        hub.disconnect(&bob_addr);
        assert!(matches!(
            alice.open(&bob_addr).await,
            Err(TransportError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn hub_assigns_distinct_addresses() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        assert_ne!(a.local_address(), b.local_address());
    }
}
