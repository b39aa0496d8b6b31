//! Row types for the persistent store.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A source video identified by `(platform, video_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: i64,
    pub platform: String,
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_sec: i64,
    pub published_at: Option<String>,
    pub thumbnail_url: String,
    pub audio_url: String,
    pub status: i64,
}

impl VideoRecord {
    pub(crate) const COLUMNS: &'static str = "id, platform, video_id, title, description, \
        channel_title, duration_sec, published_at, thumbnail_url, audio_url, status";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            platform: row.get(1)?,
            video_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            channel_title: row.get(5)?,
            duration_sec: row.get(6)?,
            published_at: row.get(7)?,
            thumbnail_url: row.get(8)?,
            audio_url: row.get(9)?,
            status: row.get(10)?,
        })
    }

    /// Whether every field the metadata source can fill is already populated.
    pub fn is_complete(&self) -> bool {
        !self.title.is_empty()
            && !self.channel_title.is_empty()
            && !self.thumbnail_url.is_empty()
            && self.duration_sec > 0
            && self.published_at.is_some()
    }
}

/// Freshly resolved metadata offered to a video row.
///
/// Only fields that are empty on the stored row are taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoBackfill {
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_sec: i64,
    pub published_at: Option<String>,
    pub thumbnail_url: String,
}

/// Recognized and translated text for one `(video, language)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: i64,
    pub video_row_id: i64,
    pub language: String,
    pub original_text: String,
    pub translated_text: String,
    pub asr_char_count: i64,
    pub translate_char_count: i64,
}

impl TranscriptRecord {
    pub(crate) const COLUMNS: &'static str = "id, video_row_id, language, original_text, \
        translated_text, asr_char_count, translate_char_count";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_row_id: row.get(1)?,
            language: row.get(2)?,
            original_text: row.get(3)?,
            translated_text: row.get(4)?,
            asr_char_count: row.get(5)?,
            translate_char_count: row.get(6)?,
        })
    }
}

/// A persisted synthesis artifact (one history entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub id: i64,
    pub user_identity: String,
    pub text_hash: String,
    pub text_preview: String,
    pub char_count: i64,
    pub speaker: String,
    pub audio_url: String,
    pub request_id: String,
    pub status: i64,
    pub created_at: String,
}

impl SynthesisRecord {
    pub(crate) const COLUMNS: &'static str = "id, user_identity, text_hash, text_preview, \
        char_count, speaker, audio_url, request_id, status, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_identity: row.get(1)?,
            text_hash: row.get(2)?,
            text_preview: row.get(3)?,
            char_count: row.get(4)?,
            speaker: row.get(5)?,
            audio_url: row.get(6)?,
            request_id: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

/// Insert payload for a synthesis history row.
#[derive(Debug, Clone)]
pub struct NewSynthesis {
    pub user_identity: String,
    pub text_hash: String,
    pub text_preview: String,
    pub char_count: i64,
    pub speaker: String,
    pub audio_url: String,
    pub request_id: String,
}

/// Which consumable balance a ledger operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Asr,
    Tts,
}

impl QuotaKind {
    pub(crate) fn remain_column(&self) -> &'static str {
        match self {
            QuotaKind::Asr => "remain_asr_chars",
            QuotaKind::Tts => "remain_tts_chars",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Asr => "asr",
            QuotaKind::Tts => "tts",
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-user allocation of remaining character balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageGrant {
    pub id: i64,
    pub user_identity: String,
    pub package_id: i64,
    pub remain_asr_chars: i64,
    pub remain_tts_chars: i64,
    /// Unix seconds; `None` never expires.
    pub expire_at: Option<i64>,
}

impl PackageGrant {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_identity: row.get(1)?,
            package_id: row.get(2)?,
            remain_asr_chars: row.get(3)?,
            remain_tts_chars: row.get(4)?,
            expire_at: row.get(5)?,
        })
    }
}

/// Balance report line for one grant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantView {
    pub grant_id: i64,
    pub package_name: String,
    pub asr_quota: i64,
    pub asr_remaining: i64,
    pub asr_used: i64,
    pub tts_quota: i64,
    pub tts_remaining: i64,
    pub tts_used: i64,
    pub expire_at: Option<DateTime<Utc>>,
}

impl GrantView {
    pub(crate) fn build(
        grant: &PackageGrant,
        package_name: String,
        asr_quota: i64,
        tts_quota: i64,
    ) -> Self {
        let (asr_quota, asr_remaining, asr_used) = clamp_usage(asr_quota, grant.remain_asr_chars);
        let (tts_quota, tts_remaining, tts_used) = clamp_usage(tts_quota, grant.remain_tts_chars);

        Self {
            grant_id: grant.id,
            package_name,
            asr_quota,
            asr_remaining,
            asr_used,
            tts_quota,
            tts_remaining,
            tts_used,
            expire_at: grant
                .expire_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }
    }
}

/// Returns `(quota, remaining, used)` with everything inside `0..=quota`.
///
/// Grants detached from a package report their remaining balance as the quota.
fn clamp_usage(quota: i64, remaining: i64) -> (i64, i64, i64) {
    let remaining = remaining.max(0);
    let quota = if quota <= 0 { remaining } else { quota };
    let remaining = remaining.min(quota);
    (quota, remaining, quota - remaining)
}

/// Daily usage counters for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDailyRecord {
    pub user_identity: String,
    pub date: String,
    pub asr_chars: i64,
    pub translate_chars: i64,
    pub tts_chars: i64,
    pub requests: i64,
}

impl UsageDailyRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_identity: row.get(0)?,
            date: row.get(1)?,
            asr_chars: row.get(2)?,
            translate_chars: row.get(3)?,
            tts_chars: row.get(4)?,
            requests: row.get(5)?,
        })
    }
}

/// Additive increment applied to a daily usage row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub asr_chars: i64,
    pub translate_chars: i64,
    pub tts_chars: i64,
    pub requests: i64,
}

impl UsageDelta {
    pub fn asr(chars: i64) -> Self {
        Self {
            asr_chars: chars,
            requests: 1,
            ..Default::default()
        }
    }

    pub fn translate(chars: i64) -> Self {
        Self {
            translate_chars: chars,
            ..Default::default()
        }
    }

    pub fn tts(chars: i64) -> Self {
        Self {
            tts_chars: chars,
            requests: 1,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asr_chars == 0 && self.translate_chars == 0 && self.tts_chars == 0 && self.requests == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_usage() {
        assert_eq!(clamp_usage(100, 40), (100, 40, 60));
        assert_eq!(clamp_usage(100, 150), (100, 100, 0));
        assert_eq!(clamp_usage(0, 25), (25, 25, 0));
        assert_eq!(clamp_usage(100, -5), (100, 0, 100));
    }

    #[test]
    fn test_video_completeness() {
        let mut video = VideoRecord {
            id: 1,
            platform: "youtube".into(),
            video_id: "dQw4w9WgXcQ".into(),
            title: "t".into(),
            description: String::new(),
            channel_title: "Rick Astley".into(),
            duration_sec: 212,
            published_at: Some("2009-10-25".into()),
            thumbnail_url: String::new(),
            audio_url: String::new(),
            status: 0,
        };
        assert!(!video.is_complete());
        video.thumbnail_url = "/static/thumbs/youtube/dQw4w9WgXcQ.jpg".into();
        assert!(video.is_complete());
    }
}
