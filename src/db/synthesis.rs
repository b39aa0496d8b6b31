//! Synthesis history and registered voices.

use super::{now_text, Database, NewSynthesis, SynthesisRecord};
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, instrument};

impl Database {
    pub fn find_synthesis(
        &self,
        identity: &str,
        text_hash: &str,
        speaker: &str,
    ) -> Result<Option<SynthesisRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM tts_history WHERE user_identity = ?1 AND text_hash = ?2 AND speaker = ?3",
            SynthesisRecord::COLUMNS
        );
        let record = conn
            .query_row(&sql, params![identity, text_hash, speaker], SynthesisRecord::from_row)
            .optional()?;
        Ok(record)
    }

    /// Insert a history row unless one already exists for the key, then
    /// return whichever row is persisted.
    #[instrument(skip(self, entry), fields(identity = %entry.user_identity))]
    pub fn insert_synthesis(&self, entry: &NewSynthesis) -> Result<SynthesisRecord> {
        let conn = self.conn()?;
        let now = now_text();

        let inserted = conn.execute(
            r#"
            INSERT INTO tts_history
            (user_identity, text_hash, text_preview, char_count, speaker,
             audio_url, request_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            ON CONFLICT(user_identity, text_hash, speaker) DO NOTHING
            "#,
            params![
                entry.user_identity,
                entry.text_hash,
                entry.text_preview,
                entry.char_count,
                entry.speaker,
                entry.audio_url,
                entry.request_id,
                now,
            ],
        )?;
        if inserted == 0 {
            debug!("History row already present, keeping the persisted artifact");
        }

        let sql = format!(
            "SELECT {} FROM tts_history WHERE user_identity = ?1 AND text_hash = ?2 AND speaker = ?3",
            SynthesisRecord::COLUMNS
        );
        let record = conn.query_row(
            &sql,
            params![entry.user_identity, entry.text_hash, entry.speaker],
            SynthesisRecord::from_row,
        )?;
        Ok(record)
    }

    /// Newest-first page of an identity's history plus the total row count.
    pub fn list_synthesis(
        &self,
        identity: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<SynthesisRecord>, i64)> {
        let conn = self.conn()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tts_history WHERE user_identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM tts_history WHERE user_identity = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            SynthesisRecord::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![identity, limit, offset], SynthesisRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((rows, total))
    }

    /// Register (or replace) the personalized voice of an identity.
    pub fn upsert_voice(&self, identity: &str, voice_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = now_text();
        conn.execute(
            r#"
            INSERT INTO user_voice (identity, voice_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(identity) DO UPDATE SET
                voice_id = excluded.voice_id,
                updated_at = excluded.updated_at
            "#,
            params![identity, voice_id, now],
        )?;
        Ok(())
    }

    pub fn find_voice(&self, identity: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let voice = conn
            .query_row(
                "SELECT voice_id FROM user_voice WHERE identity = ?1 AND voice_id <> ''",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(voice)
    }
}
