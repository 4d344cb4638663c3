//! The session controller.
//!
//! One task owns everything with state: the store handle, the contact book,
//! the conversation projections and the address-to-username routes. User
//! operations arrive as typed commands, connection-manager events arrive on
//! their own channel, and both are processed by a single `select!` loop, so
//! no handler ever observes another handler's half-applied update.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_net::{
    spawn_manager, ConnectionInfo, ManagerConfig, NetEvent, NetHandle, NetError, Transport,
};
use parley_shared::constants::CHANNEL_BUFFER;
use parley_shared::{Address, Attachment, ChatFrame, Frame, LocalIdentity};
use parley_store::{Contact, Database, Message, Snapshot};

use crate::contacts::ContactBook;
use crate::conversation::ConversationCache;
use crate::directory::{Directory, DirectoryError, PeerLocation};
use crate::error::SessionError;
use crate::events::SessionEvent;

/// Result of a send: the frame was handed to the transport, or the peer had
/// no open connection and the message only lives in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    StoredOffline,
}

/// Commands sent *into* the session task.
enum SessionCommand {
    SendToContact {
        username: String,
        content: String,
        attachment: Option<Attachment>,
        reply: oneshot::Sender<Result<SendOutcome, SessionError>>,
    },
    ConnectToUsername {
        username: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetActiveConversation {
        key: Option<String>,
    },
    Conversation {
        key: String,
        reply: oneshot::Sender<Vec<Message>>,
    },
    Contacts {
        reply: oneshot::Sender<Vec<Contact>>,
    },
    OnlinePeers {
        reply: oneshot::Sender<Result<Vec<PeerLocation>, SessionError>>,
    },
    Connections {
        reply: oneshot::Sender<Result<Vec<ConnectionInfo>, SessionError>>,
    },
    ExportSnapshot {
        reply: oneshot::Sender<Result<Snapshot, SessionError>>,
    },
    ImportSnapshot {
        snapshot: Box<Snapshot>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ClearConversation {
        key: String,
        reply: oneshot::Sender<Result<usize, SessionError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for driving the session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send_command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Send a message to a known contact.
    ///
    /// The message is appended to the local store before any network step,
    /// so it is visible locally even when the peer is unreachable. With no
    /// open connection the outcome is [`SendOutcome::StoredOffline`]; no
    /// connection attempt and no retry is made.
    pub async fn send_to_contact(
        &self,
        username: impl Into<String>,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Result<SendOutcome, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::SendToContact {
            username: username.into(),
            content: content.into(),
            attachment,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Resolve a username through the directory and open a connection to it.
    ///
    /// Fails with [`DirectoryError::PeerOffline`] when the directory has no
    /// live address. The contact record is refreshed once the peer's
    /// introduction arrives.
    pub async fn connect_to_username(
        &self,
        username: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::ConnectToUsername {
            username: username.into(),
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Select the conversation whose projection should be kept fresh.
    pub async fn set_active_conversation(
        &self,
        key: Option<String>,
    ) -> Result<(), SessionError> {
        self.send_command(SessionCommand::SetActiveConversation { key })
            .await
    }

    /// The stored messages of one conversation, ascending by timestamp.
    /// Storage read failures degrade to an empty history.
    pub async fn conversation(&self, key: impl Into<String>) -> Result<Vec<Message>, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::Conversation {
            key: key.into(),
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// All known contacts.
    pub async fn contacts(&self) -> Result<Vec<Contact>, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::Contacts { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Everyone the directory currently reports as online.
    pub async fn online_peers(&self) -> Result<Vec<PeerLocation>, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::OnlinePeers { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Snapshot of the live connections.
    pub async fn connections(&self) -> Result<Vec<ConnectionInfo>, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::Connections { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Export the full local store as one document.
    pub async fn export_snapshot(&self) -> Result<Snapshot, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::ExportSnapshot { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Replace the full local store with a snapshot's contents.
    pub async fn import_snapshot(&self, snapshot: Snapshot) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::ImportSnapshot {
            snapshot: Box::new(snapshot),
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Bulk-clear one conversation's messages.
    pub async fn clear_conversation(&self, key: impl Into<String>) -> Result<usize, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::ClearConversation {
            key: key.into(),
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Close every connection, report offline to the directory, and stop.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::Shutdown { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

/// The session task's state. Constructed by [`Session::start`] and owned by
/// the spawned loop; external code only holds a [`SessionHandle`].
pub struct Session<D: Directory> {
    identity: LocalIdentity,
    store: Database,
    net: NetHandle,
    directory: D,
    contacts: ContactBook,
    conversations: ConversationCache,
    /// Address -> username for connections whose handshake completed.
    routes: HashMap<Address, String>,
    events: mpsc::Sender<SessionEvent>,
}

impl<D: Directory> Session<D> {
    /// Start a session: register our address with the directory, load the
    /// contact book, spawn the connection manager and the session task.
    ///
    /// Returns the command handle plus the event stream for the
    /// presentation layer.
    pub async fn start<T: Transport>(
        store: Database,
        transport: T,
        directory: D,
        username: impl Into<String>,
        config: ManagerConfig,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>), SessionError> {
        let identity = LocalIdentity::new(username, transport.local_address());

        directory.register_address(&identity).await?;

        let contacts = ContactBook::load(&store);
        info!(
            user = %identity.username,
            address = %identity.address,
            contacts = contacts.len(),
            "session starting"
        );

        let (net, net_events) = spawn_manager(transport, identity.clone(), config);
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);

        let session = Session {
            identity,
            store,
            net,
            directory,
            contacts,
            conversations: ConversationCache::new(),
            routes: HashMap::new(),
            events: event_tx,
        };

        tokio::spawn(session.run(cmd_rx, net_events));

        Ok((SessionHandle { cmd_tx }, event_rx))
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut net_events: mpsc::Receiver<NetEvent>,
    ) {
        self.auto_connect().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown { reply }) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            // Every handle dropped: treat like a shutdown.
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                event = net_events.recv() => {
                    match event {
                        Some(event) => self.handle_net_event(event).await,
                        None => {
                            warn!("connection manager stopped, ending session");
                            break;
                        }
                    }
                }
            }
        }

        info!("session stopped");
    }

    /// If the user opted in, dial every known contact on startup, through a
    /// fresh directory lookup, since stored addresses go stale between
    /// sessions.
    async fn auto_connect(&mut self) {
        let settings = match self.store.load_app_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "failed to load settings, skipping auto-connect");
                return;
            }
        };
        if !settings.auto_connect {
            return;
        }

        for contact in self.contacts.all() {
            match self.directory.lookup(&contact.username).await {
                Ok(location) => {
                    debug!(user = %location.username, "auto-connecting");
                    let _ = self.net.connect(location.address).await;
                }
                Err(DirectoryError::PeerOffline(_)) | Err(DirectoryError::UnknownUser(_)) => {}
                Err(e) => warn!(user = %contact.username, error = %e, "auto-connect lookup failed"),
            }
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SendToContact {
                username,
                content,
                attachment,
                reply,
            } => {
                let result = self.send_to_contact(username, content, attachment).await;
                let _ = reply.send(result);
            }
            SessionCommand::ConnectToUsername { username, reply } => {
                let result = self.connect_to_username(username).await;
                let _ = reply.send(result);
            }
            SessionCommand::SetActiveConversation { key } => {
                self.conversations.set_active(key);
            }
            SessionCommand::Conversation { key, reply } => {
                let messages = self.conversations.messages(&self.store, &key).to_vec();
                let _ = reply.send(messages);
            }
            SessionCommand::Contacts { reply } => {
                let _ = reply.send(self.contacts.all());
            }
            SessionCommand::OnlinePeers { reply } => {
                let result = self.directory.online_peers().await.map_err(Into::into);
                let _ = reply.send(result);
            }
            SessionCommand::Connections { reply } => {
                let result = self.net.connections().await.map_err(Into::into);
                let _ = reply.send(result);
            }
            SessionCommand::ExportSnapshot { reply } => {
                let _ = reply.send(self.store.export_all().map_err(Into::into));
            }
            SessionCommand::ImportSnapshot { snapshot, reply } => {
                let result = self.import_snapshot(&snapshot);
                let _ = reply.send(result);
            }
            SessionCommand::ClearConversation { key, reply } => {
                let result = self.store.clear_conversation(&key).map_err(Into::into);
                if result.is_ok() {
                    self.conversations.refresh(&self.store, &key);
                }
                let _ = reply.send(result);
            }
            // Intercepted by the run loop so it can break; never reaches here.
            SessionCommand::Shutdown { .. } => {}
        }
    }

    /// Persist first, then try the network; never auto-connect on a plain
    /// send.
    async fn send_to_contact(
        &mut self,
        username: String,
        content: String,
        attachment: Option<Attachment>,
    ) -> Result<SendOutcome, SessionError> {
        if let Some(att) = &attachment {
            att.check_size()?;
        }

        let contact = self
            .contacts
            .get(&username)
            .cloned()
            .ok_or_else(|| SessionError::UnknownContact(username.clone()))?;

        let timestamp = Utc::now();
        let mut message = Message {
            seq: None,
            conversation_key: username.clone(),
            sender: self.identity.username.clone(),
            recipient: username.clone(),
            content,
            timestamp,
            attachment,
        };

        // The append happens before any network step: a send the transport
        // rejects is still visible locally.
        message.seq = Some(self.store.append_message(&message)?);
        self.conversations.refresh(&self.store, &username);

        let frame = Frame::Chat(ChatFrame {
            from: message.sender.clone(),
            content: message.content.clone(),
            timestamp,
            attachment: message.attachment.clone(),
        });

        match self.net.send(contact.address.clone(), frame).await {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(NetError::NotConnected(_)) => {
                info!(user = %username, "no open connection, message stored locally");
                self.emit(SessionEvent::PeerOffline { username }).await;
                Ok(SendOutcome::StoredOffline)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn connect_to_username(&mut self, username: String) -> Result<(), SessionError> {
        let location = self.directory.lookup(&username).await?;

        // An explicit connect creates the contact right away; the handshake
        // will refresh it.
        self.contacts.upsert(
            &self.store,
            Contact {
                username: location.username.clone(),
                address: location.address.clone(),
                last_seen: Utc::now(),
            },
        )?;

        info!(user = %username, address = %location.address, "connecting");
        self.net.connect(location.address).await?;
        Ok(())
    }

    fn import_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SessionError> {
        self.store.import_all(snapshot)?;
        self.contacts.reload(&self.store);
        self.conversations.clear_loaded();
        Ok(())
    }

    async fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::ConnectionOpened { address } => {
                self.emit(SessionEvent::PeerConnected { address }).await;
            }

            NetEvent::IntroductionReceived {
                address,
                username,
                listed_address,
            } => {
                if username == self.identity.username {
                    warn!(%address, "peer introduced itself with our own username, ignoring");
                    return;
                }

                self.routes.insert(address, username.clone());

                let contact = Contact {
                    username,
                    address: listed_address,
                    last_seen: Utc::now(),
                };
                match self.contacts.upsert(&self.store, contact.clone()) {
                    Ok(()) => {
                        self.emit(SessionEvent::ContactUpdated { contact }).await;
                    }
                    Err(e) => {
                        warn!(user = %contact.username, error = %e, "failed to persist contact");
                        self.emit(SessionEvent::StorageFault {
                            context: format!("contact {:?} not persisted", contact.username),
                        })
                        .await;
                    }
                }
            }

            NetEvent::FrameReceived { address, frame } => {
                self.handle_chat_frame(address, frame).await;
            }

            NetEvent::ConnectionClosed { address, reason } => {
                self.routes.remove(&address);
                self.emit(SessionEvent::PeerDisconnected { address, reason })
                    .await;
            }
        }
    }

    async fn handle_chat_frame(&mut self, address: Address, frame: ChatFrame) {
        // The conversation key comes from the handshake binding, not from
        // whatever the frame claims.
        let Some(username) = self.routes.get(&address).cloned() else {
            warn!(%address, "chat frame on a connection with no completed handshake, dropping");
            return;
        };

        let mut message = Message {
            seq: None,
            conversation_key: username.clone(),
            sender: frame.from,
            recipient: self.identity.username.clone(),
            content: frame.content,
            timestamp: frame.timestamp,
            attachment: frame.attachment,
        };

        match self.store.append_message(&message) {
            Ok(seq) => message.seq = Some(seq),
            Err(e) => {
                // The caller of record is the user: they must learn the
                // message is not durable.
                warn!(user = %username, error = %e, "failed to persist incoming message");
                self.emit(SessionEvent::StorageFault {
                    context: format!("incoming message from {username:?} not persisted"),
                })
                .await;
                return;
            }
        }

        if self.conversations.is_active(&username) {
            self.conversations.refresh(&self.store, &username);
        }

        self.emit(SessionEvent::MessageReceived { message }).await;
    }

    async fn shutdown(&mut self) {
        info!("session shutting down");

        // Close every live connection first, then tell the directory.
        if let Err(e) = self.net.shutdown().await {
            debug!(error = %e, "connection manager already stopped");
        }
        if let Err(e) = self.directory.report_offline().await {
            warn!(error = %e, "failed to report offline status");
        }
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}
