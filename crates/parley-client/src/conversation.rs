//! Per-conversation message projections.
//!
//! Each conversation's loaded messages are owned by the session and
//! addressed by conversation key. The invalidation rule is deliberate:
//! every append triggers a reload from the store, never an incremental
//! patch, so a projection can never drift from what is actually persisted.

use std::collections::HashMap;

use tracing::error;

use parley_store::{Database, Message};

#[derive(Default)]
pub struct ConversationCache {
    loaded: HashMap<String, Vec<Message>>,
    active: Option<String>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the conversation the user is currently viewing.
    pub fn set_active(&mut self, key: Option<String>) {
        self.active = key;
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.as_deref() == Some(key)
    }

    /// The messages of one conversation, loading from the store on first
    /// access. A failed read degrades to an empty history.
    pub fn messages(&mut self, db: &Database, key: &str) -> &[Message] {
        if !self.loaded.contains_key(key) {
            self.refresh(db, key);
        }
        self.loaded.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reload one conversation from the store.
    pub fn refresh(&mut self, db: &Database, key: &str) {
        let messages = match db.list_messages(key) {
            Ok(messages) => messages,
            Err(e) => {
                error!(conversation = key, error = %e, "failed to load messages, showing none");
                Vec::new()
            }
        };
        self.loaded.insert(key.to_string(), messages);
    }

    /// Drop every loaded projection (e.g. after a snapshot import).
    pub fn clear_loaded(&mut self) {
        self.loaded.clear();
    }
}
