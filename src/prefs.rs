//! Persisted UI preference flags.
//!
//! Only small view flags are stored here. Server data is never written to
//! disk; it lives in the in-memory freshness caches.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed key the preference blob is stored under
pub const PREFS_KEY: &str = "listsync-dash.ui-prefs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPrefs {
  pub show_logs: bool,
  /// Periodically refresh the visible list
  pub auto_refresh: bool,
  pub page_size: u32,
}

impl Default for UiPrefs {
  fn default() -> Self {
    Self {
      show_logs: true,
      auto_refresh: true,
      page_size: 50,
    }
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed key-value store for preferences.
pub struct PrefsStore {
  conn: Connection,
}

impl PrefsStore {
  /// Open or create the store at the default location
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open preferences at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory preferences: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(Self { conn })
  }

  /// Data directory shared with the log files
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("listsync-dash"))
  }

  fn default_path() -> Result<PathBuf> {
    Ok(Self::data_dir()?.join("prefs.db"))
  }

  /// Load stored preferences. Missing or unreadable values fall back to
  /// the defaults.
  pub fn load(&self) -> Result<UiPrefs> {
    let value: Option<String> = self
      .conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![PREFS_KEY], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read preferences: {}", e))?;

    Ok(
      value
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or_default(),
    )
  }

  pub fn save(&self, prefs: &UiPrefs) -> Result<()> {
    let value = serde_json::to_string(prefs)?;
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![PREFS_KEY, value],
      )
      .map_err(|e| eyre!("Failed to save preferences: {}", e))?;
    Ok(())
  }
}
