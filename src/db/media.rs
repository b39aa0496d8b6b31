//! Video and transcript rows.

use super::{now_text, Database, TranscriptRecord, VideoBackfill, VideoRecord};
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, instrument};

impl Database {
    /// Look up a video by its natural key.
    pub fn find_video(&self, platform: &str, video_id: &str) -> Result<Option<VideoRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM video WHERE platform = ?1 AND video_id = ?2",
            VideoRecord::COLUMNS
        );
        let video = conn
            .query_row(&sql, params![platform, video_id], VideoRecord::from_row)
            .optional()?;
        Ok(video)
    }

    /// Look up a video by an alternate id such as a short-link code.
    pub fn find_video_by_alias(&self, platform: &str, alias: &str) -> Result<Option<VideoRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM video WHERE id = \
             (SELECT video_row_id FROM video_alias WHERE platform = ?1 AND alias = ?2)",
            VideoRecord::COLUMNS
        );
        let video = conn
            .query_row(&sql, params![platform, alias], VideoRecord::from_row)
            .optional()?;
        Ok(video)
    }

    /// Point `alias` at the video row `video_row_id`.
    #[instrument(skip(self))]
    pub fn add_video_alias(&self, platform: &str, alias: &str, video_row_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO video_alias (platform, alias, video_row_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (platform, alias) DO UPDATE SET video_row_id = excluded.video_row_id",
            params![platform, alias, video_row_id, now_text()],
        )?;
        debug!(platform, alias, video_row_id, "Recorded video alias");
        Ok(())
    }

    /// Create the video row or fill its empty fields from `meta`.
    ///
    /// Populated fields are never overwritten, so concurrent resolutions of
    /// the same video converge on the first non-empty value for each field.
    #[instrument(skip(self, meta))]
    pub fn upsert_video(
        &self,
        platform: &str,
        video_id: &str,
        meta: &VideoBackfill,
    ) -> Result<VideoRecord> {
        let conn = self.conn()?;
        let now = now_text();

        conn.execute(
            r#"
            INSERT INTO video
            (platform, video_id, title, description, channel_title, duration_sec,
             published_at, thumbnail_url, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(platform, video_id) DO UPDATE SET
                title = CASE WHEN video.title = '' THEN excluded.title ELSE video.title END,
                description = CASE WHEN video.description = '' THEN excluded.description
                                   ELSE video.description END,
                channel_title = CASE WHEN video.channel_title = '' THEN excluded.channel_title
                                     ELSE video.channel_title END,
                duration_sec = CASE WHEN video.duration_sec = 0 THEN excluded.duration_sec
                                    ELSE video.duration_sec END,
                published_at = COALESCE(video.published_at, excluded.published_at),
                thumbnail_url = CASE WHEN video.thumbnail_url = '' THEN excluded.thumbnail_url
                                     ELSE video.thumbnail_url END,
                updated_at = excluded.updated_at
            "#,
            params![
                platform,
                video_id,
                meta.title,
                meta.description,
                meta.channel_title,
                meta.duration_sec,
                meta.published_at,
                meta.thumbnail_url,
                now,
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM video WHERE platform = ?1 AND video_id = ?2",
            VideoRecord::COLUMNS
        );
        let video = conn.query_row(&sql, params![platform, video_id], VideoRecord::from_row)?;
        debug!("Upserted video row {}", video.id);
        Ok(video)
    }

    /// Replace a remote thumbnail with its mirrored copy.
    ///
    /// Only applies while the row still holds `remote`; returns whether it did.
    pub fn replace_thumbnail(&self, id: i64, remote: &str, mirrored: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE video SET thumbnail_url = ?1, updated_at = ?2 WHERE id = ?3 AND thumbnail_url = ?4",
            params![mirrored, now_text(), id, remote],
        )?;
        Ok(changed > 0)
    }

    /// Store the managed audio reference of a video.
    pub fn set_video_audio(&self, id: i64, audio_url: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE video SET audio_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![audio_url, now_text(), id],
        )?;
        Ok(())
    }

    /// Create or replace the transcript of `(video_row_id, language)`.
    #[instrument(skip(self, original_text, translated_text))]
    pub fn upsert_transcript(
        &self,
        video_row_id: i64,
        language: &str,
        original_text: &str,
        translated_text: &str,
        asr_char_count: i64,
        translate_char_count: i64,
    ) -> Result<TranscriptRecord> {
        let conn = self.conn()?;
        let now = now_text();

        conn.execute(
            r#"
            INSERT INTO transcript
            (video_row_id, language, original_text, translated_text,
             asr_char_count, translate_char_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(video_row_id, language) DO UPDATE SET
                original_text = excluded.original_text,
                translated_text = excluded.translated_text,
                asr_char_count = excluded.asr_char_count,
                translate_char_count = excluded.translate_char_count,
                updated_at = excluded.updated_at
            "#,
            params![
                video_row_id,
                language,
                original_text,
                translated_text,
                asr_char_count,
                translate_char_count,
                now,
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM transcript WHERE video_row_id = ?1 AND language = ?2",
            TranscriptRecord::COLUMNS
        );
        let record = conn.query_row(&sql, params![video_row_id, language], TranscriptRecord::from_row)?;
        Ok(record)
    }

    pub fn find_transcript(
        &self,
        video_row_id: i64,
        language: &str,
    ) -> Result<Option<TranscriptRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transcript WHERE video_row_id = ?1 AND language = ?2",
            TranscriptRecord::COLUMNS
        );
        let record = conn
            .query_row(&sql, params![video_row_id, language], TranscriptRecord::from_row)
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, thumb: &str) -> VideoBackfill {
        VideoBackfill {
            title: title.to_string(),
            thumbnail_url: thumb.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backfill_keeps_populated_fields() {
        let db = Database::in_memory().unwrap();

        let first = db.upsert_video("youtube", "abc", &meta("Original", "")).unwrap();
        assert_eq!(first.title, "Original");
        assert!(first.thumbnail_url.is_empty());

        let second = db
            .upsert_video("youtube", "abc", &meta("Renamed", "https://i.ytimg.com/abc.jpg"))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.title, "Original");
        assert_eq!(second.thumbnail_url, "https://i.ytimg.com/abc.jpg");
    }

    #[test]
    fn test_backfill_sets_publish_date_once() {
        let db = Database::in_memory().unwrap();
        let mut m = meta("t", "");
        m.published_at = Some("2024-01-01".into());
        db.upsert_video("bilibili", "BV1", &m).unwrap();

        m.published_at = Some("2025-05-05".into());
        m.duration_sec = 90;
        let video = db.upsert_video("bilibili", "BV1", &m).unwrap();
        assert_eq!(video.published_at.as_deref(), Some("2024-01-01"));
        assert_eq!(video.duration_sec, 90);
    }

    #[test]
    fn test_replace_thumbnail_is_conditional() {
        let db = Database::in_memory().unwrap();
        let video = db
            .upsert_video("youtube", "abc", &meta("t", "https://cdn/x.jpg"))
            .unwrap();

        assert!(db.replace_thumbnail(video.id, "https://cdn/x.jpg", "/static/thumbs/youtube/abc.jpg").unwrap());
        assert!(!db.replace_thumbnail(video.id, "https://cdn/x.jpg", "/static/other.jpg").unwrap());

        let stored = db.find_video("youtube", "abc").unwrap().unwrap();
        assert_eq!(stored.thumbnail_url, "/static/thumbs/youtube/abc.jpg");
    }

    #[test]
    fn test_transcript_upsert_replaces_text() {
        let db = Database::in_memory().unwrap();
        let video = db.upsert_video("youtube", "abc", &meta("t", "")).unwrap();

        db.upsert_transcript(video.id, "zh", "hello", "你好", 5, 2).unwrap();
        let updated = db.upsert_transcript(video.id, "zh", "hello there", "你好呀", 11, 3).unwrap();

        assert_eq!(updated.original_text, "hello there");
        assert_eq!(updated.asr_char_count, 11);
        let found = db.find_transcript(video.id, "zh").unwrap().unwrap();
        assert_eq!(found.id, updated.id);
        assert!(db.find_transcript(video.id, "en").unwrap().is_none());
    }

    #[test]
    fn test_alias_resolves_to_canonical_row() {
        let db = Database::in_memory().unwrap();
        let video = db.upsert_video("bilibili", "BV1GJ411x7h7", &meta("t", "")).unwrap();

        assert!(db.find_video_by_alias("bilibili", "aBc123").unwrap().is_none());
        db.add_video_alias("bilibili", "aBc123", video.id).unwrap();
        db.add_video_alias("bilibili", "aBc123", video.id).unwrap();

        let found = db.find_video_by_alias("bilibili", "aBc123").unwrap().unwrap();
        assert_eq!(found.id, video.id);
        assert_eq!(found.video_id, "BV1GJ411x7h7");
        assert!(db.find_video_by_alias("youtube", "aBc123").unwrap().is_none());
    }
}
