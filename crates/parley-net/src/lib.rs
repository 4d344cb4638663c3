// Peer connection layer: channel abstraction over an external transport,
// plus the connection-manager task that owns every live connection.

pub mod channel;
pub mod connections;
pub mod manager;
pub mod memory;

pub use channel::{Channel, Transport, TransportError};
pub use connections::{CloseReason, ConnectionInfo, ConnectionState, ConnectionTable};
pub use manager::{spawn_manager, ManagerConfig, NetCommand, NetError, NetEvent, NetHandle};
pub use memory::{MemoryHub, MemoryTransport};
