//! In-memory view over the stored contacts.
//!
//! The session is the only writer. Updates are write-through: the store row
//! is upserted first, and the in-memory view only changes when the write
//! succeeded, so the view never claims durability the store does not have.

use std::collections::HashMap;

use tracing::error;

use parley_store::{Contact, Database, StoreError};

/// Known peers, keyed by username.
#[derive(Default)]
pub struct ContactBook {
    by_username: HashMap<String, Contact>,
}

impl ContactBook {
    /// Load all contacts from the store. A failed read degrades to an empty
    /// book rather than failing startup.
    pub fn load(db: &Database) -> Self {
        let by_username = match db.list_contacts() {
            Ok(contacts) => contacts
                .into_iter()
                .map(|c| (c.username.clone(), c))
                .collect(),
            Err(e) => {
                error!(error = %e, "failed to load contacts, starting with none");
                HashMap::new()
            }
        };
        Self { by_username }
    }

    /// Upsert a contact, store first.
    pub fn upsert(&mut self, db: &Database, contact: Contact) -> Result<(), StoreError> {
        db.upsert_contact(&contact)?;
        self.by_username.insert(contact.username.clone(), contact);
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<&Contact> {
        self.by_username.get(username)
    }

    pub fn all(&self) -> Vec<Contact> {
        self.by_username.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }

    /// Re-read the store, e.g. after a snapshot import replaced everything.
    pub fn reload(&mut self, db: &Database) {
        *self = Self::load(db);
    }
}
