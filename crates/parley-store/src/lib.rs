//! # parley-store
//!
//! Local durable storage for the Parley messenger, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the three
//! persisted collections: messages, contacts and settings. Data survives
//! process crashes and restarts; there is no networking knowledge here.

pub mod backup;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod settings;

mod error;

pub use backup::Snapshot;
pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use settings::AppSettings;
