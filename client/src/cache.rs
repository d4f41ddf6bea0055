//! Local mirror of conversation and group summaries.
//!
//! The cache is the reload/offline fallback: a successful server fetch
//! always supersedes it, a failed or empty fetch falls back to it
//! (stale-but-available). Payloads are stored as raw JSON rows keyed by
//! user id, one key per summary kind.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use lavoro_shared::{ConversationSummary, GroupSummary};

use crate::error::{ClientError, Result};

/// SQLite-backed summary cache.
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Open (or create) the default cache database in the platform data
    /// directory.
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "lavoro", "lavoro").ok_or(ClientError::NoDataDir)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|_| ClientError::NoDataDir)?;
        Self::open_at(&data_dir.join("cache.sqlite"))
    }

    /// Open (or create) a cache database at an explicit path. Used by
    /// tests and custom layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS summaries (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    fn save_raw(&self, key: &str, payload: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO summaries (cache_key, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(cache_key) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            params![key, payload, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load_raw(&self, key: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM summaries WHERE cache_key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    pub fn save_conversations(
        &self,
        user_id: &str,
        summaries: &[ConversationSummary],
    ) -> Result<()> {
        let payload = serde_json::to_string(summaries)?;
        self.save_raw(&format!("conversations_{user_id}"), &payload)
    }

    pub fn load_conversations(&self, user_id: &str) -> Result<Option<Vec<ConversationSummary>>> {
        match self.load_raw(&format!("conversations_{user_id}"))? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn save_groups(&self, user_id: &str, summaries: &[GroupSummary]) -> Result<()> {
        let payload = serde_json::to_string(summaries)?;
        self.save_raw(&format!("groups_{user_id}"), &payload)
    }

    pub fn load_groups(&self, user_id: &str) -> Result<Option<Vec<GroupSummary>>> {
        match self.load_raw(&format!("groups_{user_id}"))? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
