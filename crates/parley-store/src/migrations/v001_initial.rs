//! v001 -- Initial schema creation.
//!
//! Creates the three persisted collections: `messages`, `contacts` and
//! `settings`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_key TEXT NOT NULL,               -- the remote party's username
    sender           TEXT NOT NULL,
    recipient        TEXT NOT NULL,
    content          TEXT NOT NULL,
    timestamp        TEXT NOT NULL,               -- ISO-8601 / RFC-3339

    -- Optional attachment; either all four columns are set or none.
    attachment_name    TEXT,
    attachment_mime    TEXT,
    attachment_size    INTEGER,
    attachment_payload TEXT                       -- base64 data URI
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_key, timestamp);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    username  TEXT PRIMARY KEY NOT NULL,
    address   TEXT NOT NULL,                      -- last-known transient address
    last_seen TEXT NOT NULL                       -- ISO-8601
);

-- ----------------------------------------------------------------
-- Settings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
