//! String-keyed settings collection, plus the typed [`AppSettings`] blob
//! the application persists under the `"app"` key.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Result;
use crate::models::Setting;

/// Settings key under which [`AppSettings`] is stored as JSON.
const APP_SETTINGS_KEY: &str = "app";

/// User-facing application settings, serialized as one JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub display_name: Option<String>,
    pub notifications_enabled: bool,
    pub theme: String,
    /// Base URL of the directory service.
    pub directory_url: String,
    /// Whether to connect to known contacts automatically on startup.
    pub auto_connect: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            display_name: None,
            notifications_enabled: true,
            theme: "dark".into(),
            directory_url: parley_shared::constants::DEFAULT_DIRECTORY_URL.into(),
            auto_connect: false,
        }
    }
}

impl Database {
    /// Store or replace one settings entry.
    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Fetch one settings entry, `None` when the key has never been set.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List every settings entry.
    pub fn list_settings(&self) -> Result<Vec<Setting>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key, value FROM settings ORDER BY key ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }

    /// Load the typed application settings, falling back to defaults when
    /// nothing has been stored yet.
    pub fn load_app_settings(&self) -> Result<AppSettings> {
        match self.get_setting(APP_SETTINGS_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(AppSettings::default()),
        }
    }

    /// Persist the typed application settings.
    pub fn store_app_settings(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.put_setting(APP_SETTINGS_KEY, &json)
    }
}
