//! Append and query operations for [`Message`] rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::Attachment;

use crate::database::Database;
use crate::error::Result;
use crate::models::Message;

impl Database {
    /// Append a message and return the assigned sequence id.
    ///
    /// Not idempotent: appending logically identical content twice creates
    /// two rows. De-duplication, if needed, is the protocol layer's job.
    pub fn append_message(&self, message: &Message) -> Result<i64> {
        let (att_name, att_mime, att_size, att_payload) = match &message.attachment {
            Some(a) => (
                Some(a.name.as_str()),
                Some(a.mime_type.as_str()),
                Some(a.size_bytes as i64),
                Some(a.payload.as_str()),
            ),
            None => (None, None, None, None),
        };

        self.conn().execute(
            "INSERT INTO messages
                (conversation_key, sender, recipient, content, timestamp,
                 attachment_name, attachment_mime, attachment_size, attachment_payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.conversation_key,
                message.sender,
                message.recipient,
                message.content,
                message.timestamp.to_rfc3339(),
                att_name,
                att_mime,
                att_size,
                att_payload,
            ],
        )?;

        Ok(self.conn().last_insert_rowid())
    }

    /// List every message of one conversation, ascending by timestamp.
    ///
    /// Returns an empty vec when nothing has been stored yet.
    pub fn list_messages(&self, conversation_key: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, conversation_key, sender, recipient, content, timestamp,
                    attachment_name, attachment_mime, attachment_size, attachment_payload
             FROM messages
             WHERE conversation_key = ?1
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![conversation_key], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// List every stored message across all conversations, in append order.
    /// Used by the backup exporter.
    pub fn list_all_messages(&self) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, conversation_key, sender, recipient, content, timestamp,
                    attachment_name, attachment_mime, attachment_size, attachment_payload
             FROM messages
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Bulk-clear one conversation. Returns the number of deleted rows.
    ///
    /// This is the only way individual messages leave the store.
    pub fn clear_conversation(&self, conversation_key: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE conversation_key = ?1",
            params![conversation_key],
        )?;
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(0)?;
    let conversation_key: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let recipient: String = row.get(3)?;
    let content: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let att_name: Option<String> = row.get(6)?;
    let att_mime: Option<String> = row.get(7)?;
    let att_size: Option<i64> = row.get(8)?;
    let att_payload: Option<String> = row.get(9)?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let attachment = match (att_name, att_mime, att_size, att_payload) {
        (Some(name), Some(mime_type), Some(size), Some(payload)) => Some(Attachment {
            name,
            mime_type,
            size_bytes: size as u64,
            payload,
        }),
        _ => None,
    };

    Ok(Message {
        seq: Some(seq),
        conversation_key,
        sender,
        recipient,
        content,
        timestamp,
        attachment,
    })
}
