//! CRUD operations for [`Contact`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::Address;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Contact;

impl Database {
    /// Insert or update a contact, keyed by username.
    ///
    /// Last write wins on `address` and `last_seen`. Idempotent.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (username, address, last_seen)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET
                 address = excluded.address,
                 last_seen = excluded.last_seen",
            params![
                contact.username,
                contact.address.as_str(),
                contact.last_seen.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single contact by username.
    pub fn get_contact(&self, username: &str) -> Result<Contact> {
        self.conn()
            .query_row(
                "SELECT username, address, last_seen FROM contacts WHERE username = ?1",
                params![username],
                row_to_contact,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all known contacts.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT username, address, last_seen FROM contacts ORDER BY username ASC")?;

        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Delete a contact by username. Returns `true` if a row was deleted.
    ///
    /// Contacts are never removed automatically; this backs an explicit
    /// user action only.
    pub fn delete_contact(&self, username: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM contacts WHERE username = ?1", params![username])?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`Contact`].
fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let username: String = row.get(0)?;
    let address: String = row.get(1)?;
    let last_seen_str: String = row.get(2)?;

    let last_seen: DateTime<Utc> = DateTime::parse_from_rfc3339(&last_seen_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Contact {
        username,
        address: Address::new(address),
        last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(username: &str, address: &str) -> Contact {
        Contact {
            username: username.to_string(),
            address: Address::new(address),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_get() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_contact(&contact("bob", "addr-1")).unwrap();

        let stored = db.get_contact("bob").unwrap();
        assert_eq!(stored.address, Address::new("addr-1"));
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_contact(&contact("bob", "addr-1")).unwrap();
        db.upsert_contact(&contact("bob", "addr-2")).unwrap();

        assert_eq!(db.list_contacts().unwrap().len(), 1);
        assert_eq!(db.get_contact("bob").unwrap().address, Address::new("addr-2"));
    }

    #[test]
    fn get_missing_contact_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_contact("nobody"), Err(StoreError::NotFound)));
    }

    #[test]
    fn delete_contact_is_explicit_only() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_contact(&contact("bob", "addr-1")).unwrap();

        assert!(db.delete_contact("bob").unwrap());
        assert!(!db.delete_contact("bob").unwrap());
        assert!(db.list_contacts().unwrap().is_empty());
    }
}
