//! Connection-manager task with the tokio mpsc command/notification pattern.
//!
//! The manager event loop runs in a dedicated tokio task and is the only
//! code that touches the [`ConnectionTable`]. External code communicates
//! with it through typed command and event channels; per-channel reader
//! tasks funnel inbound traffic into the same loop, so no two handlers ever
//! observe a half-updated connection set.
//!
//! On the instant a connection reaches `Open` (whether we dialed or the
//! peer did), the manager sends its own introduction frame on it. Inbound
//! payloads are decoded at this boundary; frames that violate the protocol
//! are logged and dropped without affecting the connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_shared::constants::{CHANNEL_BUFFER, DEFAULT_CONNECT_TIMEOUT_SECS};
use parley_shared::{Address, ChatFrame, Frame, Introduction, LocalIdentity, ProtocolViolation};

use crate::channel::{Channel, Transport, TransportError};
use crate::connections::{CloseReason, ConnectionInfo, ConnectionState, ConnectionTable};

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the manager task.
#[derive(Debug)]
pub enum NetCommand {
    /// Open a connection to the given address. Idempotent by address and
    /// non-blocking: completion is observed via [`NetEvent::ConnectionOpened`].
    Connect(Address),
    /// Send a frame on the open connection for `address`.
    Send {
        address: Address,
        frame: Frame,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    /// Close the connection for `address`.
    Close(Address),
    /// Request a snapshot of the live connections.
    ListConnections(oneshot::Sender<Vec<ConnectionInfo>>),
    /// Close every connection and stop the task.
    Shutdown,
}

/// Events sent *from* the manager task to the application.
#[derive(Debug, Clone)]
pub enum NetEvent {
    /// A connection reached the open state (our introduction is on the wire).
    ConnectionOpened { address: Address },
    /// The peer introduced itself, binding its address to a username.
    /// `listed_address` is the acceptor address the peer advertises, which
    /// is what should be remembered for reconnecting later.
    IntroductionReceived {
        address: Address,
        username: String,
        listed_address: Address,
    },
    /// A chat frame arrived on the connection for `address`.
    FrameReceived { address: Address, frame: ChatFrame },
    /// The connection left the live set.
    ConnectionClosed { address: Address, reason: CloseReason },
}

/// Errors surfaced by [`NetHandle`] operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No connection in `Open` state exists for the address. A normal
    /// outcome, not an exceptional one: the caller decides the fallback.
    #[error("no open connection for {0}")]
    NotConnected(Address),

    /// The frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The manager task is no longer running.
    #[error("connection manager is not running")]
    ManagerClosed,
}

/// Configuration for spawning the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on how long a connection may stay in `Connecting`; expiry
    /// closes it as a transport fault.
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Cloneable handle for sending commands to the manager task.
#[derive(Clone)]
pub struct NetHandle {
    cmd_tx: mpsc::Sender<NetCommand>,
}

impl NetHandle {
    /// Ask the manager to open a connection. Returns once the command is
    /// enqueued; the open itself completes asynchronously.
    pub async fn connect(&self, address: Address) -> Result<(), NetError> {
        self.cmd_tx
            .send(NetCommand::Connect(address))
            .await
            .map_err(|_| NetError::ManagerClosed)
    }

    /// Send a frame on the open connection for `address`.
    ///
    /// Success means the frame was handed to the transport, not that the
    /// peer received it.
    pub async fn send(&self, address: Address, frame: Frame) -> Result<(), NetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(NetCommand::Send {
                address,
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NetError::ManagerClosed)?;
        reply_rx.await.map_err(|_| NetError::ManagerClosed)?
    }

    /// Close the connection for `address` (no-op when none is live).
    pub async fn close(&self, address: Address) -> Result<(), NetError> {
        self.cmd_tx
            .send(NetCommand::Close(address))
            .await
            .map_err(|_| NetError::ManagerClosed)
    }

    /// Snapshot the live connections.
    pub async fn connections(&self) -> Result<Vec<ConnectionInfo>, NetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(NetCommand::ListConnections(reply_tx))
            .await
            .map_err(|_| NetError::ManagerClosed)?;
        reply_rx.await.map_err(|_| NetError::ManagerClosed)
    }

    /// Close every connection and stop the manager task.
    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.cmd_tx
            .send(NetCommand::Shutdown)
            .await
            .map_err(|_| NetError::ManagerClosed)
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Internal events funneled into the loop by dial, accept and reader tasks.
enum LoopEvent {
    Opened { channel: Channel, dialed: bool },
    OpenFailed { address: Address, error: TransportError },
    Inbound { address: Address, payload: Vec<u8> },
    PeerClosed { address: Address },
}

/// Spawn the connection manager in a background tokio task.
///
/// Returns the command handle and the event receiver.
pub fn spawn_manager<T: Transport>(
    transport: T,
    identity: LocalIdentity,
    config: ManagerConfig,
) -> (NetHandle, mpsc::Receiver<NetEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<NetCommand>(CHANNEL_BUFFER);
    let (event_tx, event_rx) = mpsc::channel::<NetEvent>(CHANNEL_BUFFER);
    let (loop_tx, loop_rx) = mpsc::channel::<LoopEvent>(CHANNEL_BUFFER);

    let transport = Arc::new(transport);

    // Acceptor pump: incoming channels enter the loop like any other event.
    let accept_transport = transport.clone();
    let accept_tx = loop_tx.clone();
    tokio::spawn(async move {
        while let Some(channel) = accept_transport.accept().await {
            if accept_tx
                .send(LoopEvent::Opened {
                    channel,
                    dialed: false,
                })
                .await
                .is_err()
            {
                return;
            }
        }
        debug!("transport acceptor finished");
    });

    tokio::spawn(run_loop(
        transport, identity, config, cmd_rx, loop_tx, loop_rx, event_tx,
    ));

    (NetHandle { cmd_tx }, event_rx)
}

async fn run_loop<T: Transport>(
    transport: Arc<T>,
    identity: LocalIdentity,
    config: ManagerConfig,
    mut cmd_rx: mpsc::Receiver<NetCommand>,
    loop_tx: mpsc::Sender<LoopEvent>,
    mut loop_rx: mpsc::Receiver<LoopEvent>,
    event_tx: mpsc::Sender<NetEvent>,
) {
    let mut table = ConnectionTable::new();

    info!(address = %identity.address, "connection manager started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(NetCommand::Connect(address)) => {
                        handle_connect(&transport, &config, &mut table, &loop_tx, address);
                    }
                    Some(NetCommand::Send { address, frame, reply }) => {
                        let result = handle_send(&mut table, &event_tx, address, frame).await;
                        let _ = reply.send(result);
                    }
                    Some(NetCommand::Close(address)) => {
                        close_connection(&mut table, &event_tx, &address, CloseReason::Local).await;
                    }
                    Some(NetCommand::ListConnections(reply)) => {
                        let _ = reply.send(table.snapshot());
                    }
                    Some(NetCommand::Shutdown) => {
                        info!("connection manager shutdown requested");
                        break;
                    }
                    None => {
                        info!("command channel closed, stopping connection manager");
                        break;
                    }
                }
            }

            event = loop_rx.recv() => {
                // The loop holds its own sender, so recv never yields None here.
                let Some(event) = event else { break };
                match event {
                    LoopEvent::Opened { channel, dialed } => {
                        handle_opened(&mut table, &identity, &loop_tx, &event_tx, channel, dialed)
                            .await;
                    }
                    LoopEvent::OpenFailed { address, error } => {
                        warn!(%address, error = %error, "connection attempt failed");
                        close_connection(&mut table, &event_tx, &address, CloseReason::TransportFault)
                            .await;
                    }
                    LoopEvent::Inbound { address, payload } => {
                        handle_inbound(&mut table, &event_tx, address, &payload).await;
                    }
                    LoopEvent::PeerClosed { address } => {
                        close_connection(&mut table, &event_tx, &address, CloseReason::Remote).await;
                    }
                }
            }
        }
    }

    // Close everything on the way out.
    for address in table.drain() {
        let _ = event_tx
            .send(NetEvent::ConnectionClosed {
                address,
                reason: CloseReason::Shutdown,
            })
            .await;
    }

    info!("connection manager stopped");
}

/// Start a dial unless a live connection already exists for the address.
fn handle_connect<T: Transport>(
    transport: &Arc<T>,
    config: &ManagerConfig,
    table: &mut ConnectionTable,
    loop_tx: &mpsc::Sender<LoopEvent>,
    address: Address,
) {
    if !table.begin_connecting(&address) {
        // Idempotent: the existing connection is the result.
        return;
    }

    debug!(%address, "dialing");

    let transport = transport.clone();
    let loop_tx = loop_tx.clone();
    let connect_timeout = config.connect_timeout;
    tokio::spawn(async move {
        let event = match tokio::time::timeout(connect_timeout, transport.open(&address)).await {
            Ok(Ok(channel)) => LoopEvent::Opened {
                channel,
                dialed: true,
            },
            Ok(Err(error)) => LoopEvent::OpenFailed { address, error },
            Err(_) => LoopEvent::OpenFailed {
                address,
                error: TransportError::Timeout,
            },
        };
        let _ = loop_tx.send(event).await;
    });
}

/// A channel reached its open state (dial completed or peer dialed us).
async fn handle_opened(
    table: &mut ConnectionTable,
    identity: &LocalIdentity,
    loop_tx: &mpsc::Sender<LoopEvent>,
    event_tx: &mpsc::Sender<NetEvent>,
    channel: Channel,
    dialed: bool,
) {
    let address = channel.remote().clone();

    if dialed {
        if table.state(&address) != Some(ConnectionState::Connecting) {
            // Closed while the dial was in flight; drop the late channel.
            debug!(%address, "dial completed for a connection no longer pending, dropping");
            return;
        }
    } else if !table.begin_connecting(&address) {
        // A second channel for an address that already has a live
        // connection violates the one-per-address invariant.
        warn!(%address, "duplicate incoming channel, dropping");
        return;
    }

    let (remote, outbound, mut inbound) = channel.split();
    table.mark_open(&address, outbound);

    // Reader pump: inbound payloads and the close are funneled into the loop.
    let reader_tx = loop_tx.clone();
    tokio::spawn(async move {
        while let Some(payload) = inbound.recv().await {
            if reader_tx
                .send(LoopEvent::Inbound {
                    address: remote.clone(),
                    payload,
                })
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = reader_tx.send(LoopEvent::PeerClosed { address: remote }).await;
    });

    info!(%address, dialed, "connection open");

    // The handshake: introduce ourselves the instant the connection opens.
    send_introduction(table, event_tx, identity, &address).await;

    let _ = event_tx
        .send(NetEvent::ConnectionOpened { address })
        .await;
}

async fn send_introduction(
    table: &mut ConnectionTable,
    event_tx: &mpsc::Sender<NetEvent>,
    identity: &LocalIdentity,
    address: &Address,
) {
    let frame = Frame::Introduction(Introduction {
        username: identity.username.clone(),
        address: identity.address.clone(),
    });

    let bytes = match frame.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%address, error = %e, "failed to encode introduction");
            return;
        }
    };

    let Some(outbound) = table.outbound(address) else {
        return;
    };
    if outbound.send(bytes).await.is_err() {
        close_connection(table, event_tx, address, CloseReason::TransportFault).await;
    }
}

/// Send a chat frame; `NotConnected` unless the connection is `Open`.
async fn handle_send(
    table: &mut ConnectionTable,
    event_tx: &mpsc::Sender<NetEvent>,
    address: Address,
    frame: Frame,
) -> Result<(), NetError> {
    let Some(outbound) = table.outbound(&address) else {
        return Err(NetError::NotConnected(address));
    };

    let bytes = frame.to_bytes()?;

    if outbound.send(bytes).await.is_err() {
        // The channel died underneath us: the connection is gone.
        close_connection(table, event_tx, &address, CloseReason::TransportFault).await;
        return Err(NetError::NotConnected(address));
    }

    Ok(())
}

/// Decode one inbound payload and dispatch it.
async fn handle_inbound(
    table: &mut ConnectionTable,
    event_tx: &mpsc::Sender<NetEvent>,
    address: Address,
    payload: &[u8],
) {
    match Frame::from_bytes(payload) {
        Ok(Frame::Introduction(intro)) => {
            debug!(%address, username = %intro.username, "introduction received");
            table.set_username(&address, &intro.username);
            let _ = event_tx
                .send(NetEvent::IntroductionReceived {
                    address,
                    username: intro.username,
                    listed_address: intro.address,
                })
                .await;
        }
        Ok(Frame::Chat(frame)) => {
            let _ = event_tx
                .send(NetEvent::FrameReceived { address, frame })
                .await;
        }
        Err(violation) => {
            // Malformed input from an untrusted peer: drop the frame, keep
            // the connection.
            warn!(%address, error = %violation, "dropping invalid frame");
        }
    }
}

async fn close_connection(
    table: &mut ConnectionTable,
    event_tx: &mpsc::Sender<NetEvent>,
    address: &Address,
    reason: CloseReason,
) {
    if table.close(address) {
        info!(%address, %reason, "connection closed");
        let _ = event_tx
            .send(NetEvent::ConnectionClosed {
                address: address.clone(),
                reason,
            })
            .await;
    }
}
