//! Export / import of the full local store.
//!
//! The snapshot is a single serializable document holding all three
//! collections. Import replaces the collections inside one SQLite
//! transaction, so from the caller's perspective either all of them are
//! replaced or none are.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Contact, Message, Setting};

/// Full backup payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// When the backup was created.
    pub export_date: DateTime<Utc>,
    /// App version that produced the backup.
    pub version: String,
    pub messages: Vec<Message>,
    pub contacts: Vec<Contact>,
    pub settings: Vec<Setting>,
}

impl Database {
    /// Export all messages, contacts and settings into a serializable
    /// snapshot.
    pub fn export_all(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            export_date: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            messages: self.list_all_messages()?,
            contacts: self.list_contacts()?,
            settings: self.list_settings()?,
        })
    }

    /// Replace all three collections with the snapshot's contents.
    ///
    /// Runs in a single transaction: a failure on any row rolls back the
    /// whole import and leaves the store untouched. Idempotent.
    pub fn import_all(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM contacts", [])?;
        tx.execute("DELETE FROM settings", [])?;

        for m in &snapshot.messages {
            let (att_name, att_mime, att_size, att_payload) = match &m.attachment {
                Some(a) => (
                    Some(a.name.as_str()),
                    Some(a.mime_type.as_str()),
                    Some(a.size_bytes as i64),
                    Some(a.payload.as_str()),
                ),
                None => (None, None, None, None),
            };

            // Preserve the original sequence ids so a restored store lists
            // identically to the exported one.
            tx.execute(
                "INSERT INTO messages
                    (seq, conversation_key, sender, recipient, content, timestamp,
                     attachment_name, attachment_mime, attachment_size, attachment_payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    m.seq,
                    m.conversation_key,
                    m.sender,
                    m.recipient,
                    m.content,
                    m.timestamp.to_rfc3339(),
                    att_name,
                    att_mime,
                    att_size,
                    att_payload,
                ],
            )?;
        }

        for c in &snapshot.contacts {
            tx.execute(
                "INSERT INTO contacts (username, address, last_seen) VALUES (?1, ?2, ?3)",
                params![c.username, c.address.as_str(), c.last_seen.to_rfc3339()],
            )?;
        }

        for s in &snapshot.settings {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)",
                params![s.key, s.value],
            )?;
        }

        tx.commit()?;

        tracing::info!(
            messages = snapshot.messages.len(),
            contacts = snapshot.contacts.len(),
            settings = snapshot.settings.len(),
            "snapshot imported"
        );

        Ok(())
    }

    /// Empty all three collections in one transaction.
    pub fn clear_all(&mut self) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM contacts", [])?;
        tx.execute("DELETE FROM settings", [])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_shared::Address;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let t = |h| Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap();

        for (key, content, ts) in [("bob", "hi", t(9)), ("bob", "re", t(10)), ("carol", "yo", t(11))] {
            db.append_message(&Message {
                seq: None,
                conversation_key: key.into(),
                sender: "alice".into(),
                recipient: key.into(),
                content: content.into(),
                timestamp: ts,
                attachment: None,
            })
            .unwrap();
        }
        db.upsert_contact(&Contact {
            username: "bob".into(),
            address: Address::new("addr-b"),
            last_seen: t(10),
        })
        .unwrap();
        db.put_setting("theme", "dark").unwrap();
        db
    }

    #[test]
    fn export_clear_import_roundtrip() {
        let mut db = seeded_db();

        let snapshot = db.export_all().unwrap();
        let before_bob = db.list_messages("bob").unwrap();
        let before_carol = db.list_messages("carol").unwrap();
        let before_contacts = db.list_contacts().unwrap();

        db.clear_all().unwrap();
        assert!(db.list_messages("bob").unwrap().is_empty());
        assert!(db.list_contacts().unwrap().is_empty());

        db.import_all(&snapshot).unwrap();

        assert_eq!(db.list_messages("bob").unwrap(), before_bob);
        assert_eq!(db.list_messages("carol").unwrap(), before_carol);
        assert_eq!(db.list_contacts().unwrap(), before_contacts);
        assert_eq!(db.get_setting("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn import_replaces_rather_than_merges() {
        let mut db = seeded_db();
        let snapshot = db.export_all().unwrap();

        db.append_message(&Message {
            seq: None,
            conversation_key: "dave".into(),
            sender: "alice".into(),
            recipient: "dave".into(),
            content: "late".into(),
            timestamp: Utc::now(),
            attachment: None,
        })
        .unwrap();

        db.import_all(&snapshot).unwrap();
        assert!(db.list_messages("dave").unwrap().is_empty());
    }

    #[test]
    fn import_is_idempotent() {
        let mut db = seeded_db();
        let snapshot = db.export_all().unwrap();

        db.import_all(&snapshot).unwrap();
        db.import_all(&snapshot).unwrap();

        assert_eq!(db.list_messages("bob").unwrap().len(), 2);
        assert_eq!(db.list_contacts().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_serializes_to_one_document() {
        let db = seeded_db();
        let snapshot = db.export_all().unwrap();

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.messages.len(), snapshot.messages.len());
        assert_eq!(back.contacts.len(), snapshot.contacts.len());
    }
}
