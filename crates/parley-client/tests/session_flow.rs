//! End-to-end session scenarios over the in-memory transport and directory.

use std::time::Duration;

use tokio::sync::mpsc;

use parley_client::{
    Directory, MemoryDirectory, SendOutcome, Session, SessionEvent, SessionHandle,
};
use parley_net::{ManagerConfig, MemoryHub, Transport};
use parley_shared::{Address, Attachment, ChatFrame, Frame};
use parley_store::{Contact, Database, Message};

struct Peer {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    address: Address,
}

async fn start_peer(hub: &MemoryHub, directory: &MemoryDirectory, name: &str) -> Peer {
    start_peer_with_store(hub, directory, name, Database::open_in_memory().unwrap()).await
}

async fn start_peer_with_store(
    hub: &MemoryHub,
    directory: &MemoryDirectory,
    name: &str,
    store: Database,
) -> Peer {
    let transport = hub.endpoint_at(Address::new(format!("addr-{name}")));
    let address = transport.local_address();
    let (handle, events) = Session::start(
        store,
        transport,
        directory.shared(),
        name,
        ManagerConfig::default(),
    )
    .await
    .expect("session should start");

    Peer {
        handle,
        events,
        address,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

/// Skip unrelated events until a contact update for `username` arrives.
async fn wait_for_contact(rx: &mut mpsc::Receiver<SessionEvent>, username: &str) -> Contact {
    loop {
        if let SessionEvent::ContactUpdated { contact } = next_event(rx).await {
            if contact.username == username {
                return contact;
            }
        }
    }
}

async fn wait_for_message(rx: &mut mpsc::Receiver<SessionEvent>) -> Message {
    loop {
        if let SessionEvent::MessageReceived { message } = next_event(rx).await {
            return message;
        }
    }
}

#[tokio::test]
async fn connect_by_username_creates_exactly_one_contact() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;
    let mut bob = start_peer(&hub, &directory, "bob").await;

    // Alice has never talked to bob.
    assert!(alice.handle.contacts().await.unwrap().is_empty());

    alice.handle.connect_to_username("bob").await.unwrap();

    // The handshake binds bob's username to his acceptor address on alice's
    // side, and vice versa.
    let bob_contact = wait_for_contact(&mut alice.events, "bob").await;
    assert_eq!(bob_contact.address, bob.address);

    let alice_contact = wait_for_contact(&mut bob.events, "alice").await;
    assert_eq!(alice_contact.address, alice.address);

    let contacts = alice.handle.contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].username, "bob");
}

#[tokio::test]
async fn connect_to_offline_username_fails_with_peer_offline() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();
    directory.seed_offline("bob");

    let alice = start_peer(&hub, &directory, "alice").await;

    let result = alice.handle.connect_to_username("bob").await;
    assert!(matches!(
        result,
        Err(parley_client::SessionError::Directory(
            parley_client::DirectoryError::PeerOffline(_)
        ))
    ));
    assert!(alice.handle.contacts().await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_send_is_stored_locally_and_reported() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    // Alice knows bob from an earlier session, but he is not connected now.
    let store = Database::open_in_memory().unwrap();
    store
        .upsert_contact(&Contact {
            username: "bob".into(),
            address: Address::new("addr-bob-stale"),
            last_seen: chrono::Utc::now(),
        })
        .unwrap();

    let mut alice = start_peer_with_store(&hub, &directory, "alice", store).await;

    let outcome = alice
        .handle
        .send_to_contact("bob", "hi", None)
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::StoredOffline);

    // The message is durable locally even though nothing was transmitted.
    let messages = alice.handle.conversation("bob").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, "alice");
    assert_eq!(messages[0].conversation_key, "bob");
    assert_eq!(messages[0].content, "hi");

    // And the user is told the peer is offline.
    loop {
        if let SessionEvent::PeerOffline { username } = next_event(&mut alice.events).await {
            assert_eq!(username, "bob");
            break;
        }
    }
}

#[tokio::test]
async fn messages_flow_both_ways_once_connected() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;
    let mut bob = start_peer(&hub, &directory, "bob").await;

    alice.handle.connect_to_username("bob").await.unwrap();
    wait_for_contact(&mut alice.events, "bob").await;
    wait_for_contact(&mut bob.events, "alice").await;

    let attachment = Attachment::from_bytes("notes.txt", "text/plain", b"see attached");
    alice
        .handle
        .send_to_contact("bob", "with a file", Some(attachment))
        .await
        .unwrap();

    let received = wait_for_message(&mut bob.events).await;
    assert_eq!(received.conversation_key, "alice");
    assert_eq!(received.content, "with a file");
    let att = received.attachment.as_ref().unwrap();
    assert_eq!(att.decode_payload().unwrap(), b"see attached");

    // The reply reuses the same connection in the other direction.
    bob.handle
        .send_to_contact("alice", "got it", None)
        .await
        .unwrap();
    let reply = wait_for_message(&mut alice.events).await;
    assert_eq!(reply.conversation_key, "bob");
    assert_eq!(reply.content, "got it");

    // Both ends persisted their side of the conversation.
    assert_eq!(alice.handle.conversation("bob").await.unwrap().len(), 2);
    assert_eq!(bob.handle.conversation("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn oversized_attachments_are_rejected_before_anything_happens() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let store = Database::open_in_memory().unwrap();
    store
        .upsert_contact(&Contact {
            username: "bob".into(),
            address: Address::new("addr-bob"),
            last_seen: chrono::Utc::now(),
        })
        .unwrap();
    let alice = start_peer_with_store(&hub, &directory, "alice", store).await;

    let mut attachment = Attachment::from_bytes("huge.iso", "application/octet-stream", b"x");
    attachment.size_bytes = parley_shared::constants::MAX_ATTACHMENT_SIZE + 1;

    let result = alice
        .handle
        .send_to_contact("bob", "too big", Some(attachment))
        .await;
    assert!(result.is_err());

    // Rejected before the local append, too.
    assert!(alice.handle.conversation("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_inbound_frames_on_two_connections_both_persist() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;
    let mut bob = start_peer(&hub, &directory, "bob").await;
    let mut carol = start_peer(&hub, &directory, "carol").await;

    alice.handle.connect_to_username("bob").await.unwrap();
    alice.handle.connect_to_username("carol").await.unwrap();
    wait_for_contact(&mut bob.events, "alice").await;
    wait_for_contact(&mut carol.events, "alice").await;
    wait_for_contact(&mut alice.events, "bob").await;
    wait_for_contact(&mut alice.events, "carol").await;

    // Both peers fire at once; the session loop serialises the appends.
    let (from_bob, from_carol) = tokio::join!(
        bob.handle.send_to_contact("alice", "from bob", None),
        carol.handle.send_to_contact("alice", "from carol", None),
    );
    from_bob.unwrap();
    from_carol.unwrap();

    let first = wait_for_message(&mut alice.events).await;
    let second = wait_for_message(&mut alice.events).await;
    let mut keys = [first.conversation_key.clone(), second.conversation_key.clone()];
    keys.sort();
    assert_eq!(keys, ["bob", "carol"]);

    let from_bob = alice.handle.conversation("bob").await.unwrap();
    assert_eq!(from_bob.len(), 1);
    assert_eq!(from_bob[0].content, "from bob");

    let from_carol = alice.handle.conversation("carol").await.unwrap();
    assert_eq!(from_carol.len(), 1);
    assert_eq!(from_carol[0].content, "from carol");
}

#[tokio::test]
async fn unknown_frame_types_are_dropped_and_the_connection_survives() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;

    // A raw endpoint speaking the wire format directly, bypassing the
    // session layer.
    let raw = hub.endpoint_at(Address::new("addr-mallory"));
    let channel = raw.open(&alice.address).await.unwrap();

    let intro = Frame::Introduction(parley_shared::Introduction {
        username: "mallory".into(),
        address: Address::new("addr-mallory"),
    });
    channel.send(intro.to_bytes().unwrap()).await.unwrap();
    wait_for_contact(&mut alice.events, "mallory").await;

    // An unrecognised frame type is dropped without closing anything.
    channel
        .send(br#"{"type":"poke","from":"mallory"}"#.to_vec())
        .await
        .unwrap();

    // A valid chat frame on the same connection still arrives.
    let chat = Frame::Chat(ChatFrame {
        from: "mallory".into(),
        content: "still talking".into(),
        timestamp: chrono::Utc::now(),
        attachment: None,
    });
    channel.send(chat.to_bytes().unwrap()).await.unwrap();

    let message = wait_for_message(&mut alice.events).await;
    assert_eq!(message.content, "still talking");

    // Exactly one message was created: the unknown frame left no trace.
    assert_eq!(alice.handle.conversation("mallory").await.unwrap().len(), 1);
    assert_eq!(alice.handle.connections().await.unwrap().len(), 1);
}

#[tokio::test]
async fn snapshot_import_restores_an_earlier_state() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;
    let mut bob = start_peer(&hub, &directory, "bob").await;

    alice.handle.connect_to_username("bob").await.unwrap();
    wait_for_contact(&mut alice.events, "bob").await;
    wait_for_contact(&mut bob.events, "alice").await;

    alice
        .handle
        .send_to_contact("bob", "before the snapshot", None)
        .await
        .unwrap();
    wait_for_message(&mut bob.events).await;

    // The snapshot survives a trip through its JSON document form, the way
    // a saved backup file would.
    let snapshot = alice.handle.export_snapshot().await.unwrap();
    let json = serde_json::to_string_pretty(&snapshot).unwrap();

    alice
        .handle
        .send_to_contact("bob", "after the snapshot", None)
        .await
        .unwrap();
    wait_for_message(&mut bob.events).await;
    assert_eq!(alice.handle.conversation("bob").await.unwrap().len(), 2);

    let restored: parley_store::Snapshot = serde_json::from_str(&json).unwrap();
    alice.handle.import_snapshot(restored).await.unwrap();

    let restored = alice.handle.conversation("bob").await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].content, "before the snapshot");
    assert_eq!(alice.handle.contacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_reports_offline_to_the_directory() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut alice = start_peer(&hub, &directory, "alice").await;
    let mut bob = start_peer(&hub, &directory, "bob").await;

    alice.handle.connect_to_username("bob").await.unwrap();
    wait_for_contact(&mut alice.events, "bob").await;
    wait_for_contact(&mut bob.events, "alice").await;

    alice.handle.shutdown().await.unwrap();

    // Bob observes the connection close...
    loop {
        if let SessionEvent::PeerDisconnected { .. } = next_event(&mut bob.events).await {
            break;
        }
    }

    // ...and the directory no longer lists a live address for alice.
    let result = directory.shared().lookup("alice").await;
    assert!(matches!(
        result,
        Err(parley_client::DirectoryError::PeerOffline(_))
    ));
}

#[tokio::test]
async fn auto_connect_dials_known_contacts_through_the_directory() {
    let hub = MemoryHub::new();
    let directory = MemoryDirectory::new();

    let mut bob = start_peer(&hub, &directory, "bob").await;

    // Alice remembers bob under a stale address; auto-connect must resolve
    // the current one through the directory.
    let store = Database::open_in_memory().unwrap();
    store
        .upsert_contact(&Contact {
            username: "bob".into(),
            address: Address::new("addr-bob-old"),
            last_seen: chrono::Utc::now(),
        })
        .unwrap();
    let mut settings = store.load_app_settings().unwrap();
    settings.auto_connect = true;
    store.store_app_settings(&settings).unwrap();

    let mut alice = start_peer_with_store(&hub, &directory, "alice", store).await;

    // No explicit connect call: the handshake happens on its own.
    let contact = wait_for_contact(&mut alice.events, "bob").await;
    assert_eq!(contact.address, bob.address);
    wait_for_contact(&mut bob.events, "alice").await;
}
