//! The transport capability consumed by the connection manager.
//!
//! The real transport (NAT traversal, channel negotiation) is an external
//! collaborator; this crate only sees it through the [`Transport`] trait:
//! `open(address)` resolves once the channel reaches its open state, and
//! `accept()` yields channels that remote peers opened to us. A [`Channel`]
//! delivers discrete payloads in order; its contents are whatever the
//! protocol layer encodes, and the transport never inspects them.

use tokio::sync::mpsc;

use parley_shared::constants::CHANNEL_BUFFER;
use parley_shared::Address;

/// Errors reported by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No acceptor is reachable at the given address.
    #[error("peer at {0} is unreachable")]
    Unreachable(Address),

    /// The channel to the peer has been closed.
    #[error("channel closed")]
    ConnectionClosed,

    /// The connection attempt did not complete within the configured bound.
    #[error("connection attempt timed out")]
    Timeout,

    /// Any other channel-level failure (e.g. negotiation error).
    #[error("transport failure: {0}")]
    Other(String),
}

/// A bidirectional object channel to exactly one remote peer.
///
/// Payloads are delivered in the order they were sent; nothing is delivered
/// after the remote end closes.
pub struct Channel {
    remote: Address,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Channel {
    /// Create a connected pair of channel endpoints.
    ///
    /// `a_addr`/`b_addr` are the addresses of the two ends; each endpoint
    /// reports the *other* end as its remote.
    pub fn pair(a_addr: Address, b_addr: Address) -> (Channel, Channel) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_BUFFER);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_BUFFER);

        let a = Channel {
            remote: b_addr.clone(),
            tx: tx_b, // A sends into B's receiver
            rx: rx_a,
        };
        let b = Channel {
            remote: a_addr,
            tx: tx_a,
            rx: rx_b,
        };

        (a, b)
    }

    /// Address of the remote end.
    pub fn remote(&self) -> &Address {
        &self.remote
    }

    /// Hand one payload to the transport.
    ///
    /// Success means handed off, not delivered.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next payload; `None` once the remote end has closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Split into the remote address plus the raw send/receive halves, so
    /// the two directions can be driven from different tasks.
    pub fn split(self) -> (Address, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.remote, self.tx, self.rx)
    }
}

/// Async transport capability.
///
/// Implementations perform whatever negotiation they need; this layer only
/// observes the result. The bundled [`MemoryTransport`] backs the tests;
/// production builds plug in the platform transport.
///
/// [`MemoryTransport`]: crate::memory::MemoryTransport
pub trait Transport: Send + Sync + 'static {
    /// Open a channel to the acceptor at `address`.
    ///
    /// Resolving is the transport's "open" event: the returned channel is
    /// ready to carry payloads in both directions.
    fn open(
        &self,
        address: &Address,
    ) -> impl std::future::Future<Output = Result<Channel, TransportError>> + Send;

    /// Wait for the next channel a remote peer opened to us.
    ///
    /// Returns `None` once the transport has shut down.
    fn accept(&self) -> impl std::future::Future<Output = Option<Channel>> + Send;

    /// The transient address remote peers can open channels to.
    fn local_address(&self) -> Address;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_is_bidirectional() {
        let (a, mut b) = Channel::pair(Address::new("a"), Address::new("b"));

        assert_eq!(a.remote(), &Address::new("b"));
        assert_eq!(b.remote(), &Address::new("a"));

        a.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"ping");

        b.send(b"pong".to_vec()).await.unwrap();
        let mut a = a;
        assert_eq!(a.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn payloads_keep_their_order() {
        let (a, mut b) = Channel::pair(Address::new("a"), Address::new("b"));

        for i in 0u8..10 {
            a.send(vec![i]).await.unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(b.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn close_is_observable_from_both_ends() {
        let (a, mut b) = Channel::pair(Address::new("a"), Address::new("b"));

        drop(a);
        assert!(b.recv().await.is_none());

        let (c, d) = Channel::pair(Address::new("c"), Address::new("d"));
        drop(d);
        assert!(matches!(
            c.send(b"late".to_vec()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
