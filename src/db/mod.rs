//! Persistent keyed-record store.
//!
//! A single SQLite database holds every durable table. Uniqueness constraints
//! on the natural keys are the only concurrency control: concurrent writers
//! for the same key race to an `ON CONFLICT` upsert instead of taking an
//! application-level lock.

mod media;
mod models;
mod quota;
mod synthesis;

pub use models::{
    GrantView, NewSynthesis, PackageGrant, QuotaKind, SynthesisRecord, TranscriptRecord,
    UsageDailyRecord, UsageDelta, VideoBackfill, VideoRecord,
};

use crate::error::{Result, TransvoxError};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS video (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    video_id TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    channel_title TEXT NOT NULL DEFAULT '',
    duration_sec INTEGER NOT NULL DEFAULT 0,
    published_at TEXT,
    thumbnail_url TEXT NOT NULL DEFAULT '',
    audio_url TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (platform, video_id)
);

CREATE TABLE IF NOT EXISTS video_alias (
    platform TEXT NOT NULL,
    alias TEXT NOT NULL,
    video_row_id INTEGER NOT NULL REFERENCES video(id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (platform, alias)
);

CREATE TABLE IF NOT EXISTS transcript (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_row_id INTEGER NOT NULL REFERENCES video(id),
    language TEXT NOT NULL,
    original_text TEXT NOT NULL,
    translated_text TEXT NOT NULL,
    asr_char_count INTEGER NOT NULL DEFAULT 0,
    translate_char_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (video_row_id, language)
);

CREATE TABLE IF NOT EXISTS tts_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identity TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    text_preview TEXT NOT NULL DEFAULT '',
    char_count INTEGER NOT NULL DEFAULT 0,
    speaker TEXT NOT NULL,
    audio_url TEXT NOT NULL DEFAULT '',
    request_id TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_identity, text_hash, speaker)
);

CREATE INDEX IF NOT EXISTS idx_tts_history_identity ON tts_history(user_identity, id);

CREATE TABLE IF NOT EXISTS package (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    quota_asr_chars INTEGER NOT NULL DEFAULT 0,
    quota_tts_chars INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_package (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identity TEXT NOT NULL,
    package_id INTEGER NOT NULL DEFAULT 0,
    remain_asr_chars INTEGER NOT NULL DEFAULT 0 CHECK (remain_asr_chars >= 0),
    remain_tts_chars INTEGER NOT NULL DEFAULT 0 CHECK (remain_tts_chars >= 0),
    expire_at INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_package_identity ON user_package(user_identity, expire_at);

CREATE TABLE IF NOT EXISTS usage_daily (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identity TEXT NOT NULL,
    date TEXT NOT NULL,
    asr_chars INTEGER NOT NULL DEFAULT 0,
    translate_chars INTEGER NOT NULL DEFAULT 0,
    tts_chars INTEGER NOT NULL DEFAULT 0,
    requests INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (user_identity, date)
);

CREATE TABLE IF NOT EXISTS account_user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL UNIQUE,
    identity_type INTEGER NOT NULL DEFAULT 1,
    display_name TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_voice (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL UNIQUE,
    voice_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQLite-backed store for videos, transcripts, synthesis history, grants and usage.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (and bootstrap) the database at `path`.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets concurrent readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized database at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TransvoxError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

/// Current time as stored in `created_at`/`updated_at` columns.
fn now_text() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_bootstrap_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 8);
    }
}
