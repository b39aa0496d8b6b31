//! Video resolution and audio acquisition.

use super::{enter, AsrStage, Orchestrator};
use crate::context::CallContext;
use crate::db::{VideoBackfill, VideoRecord};
use crate::effects::BestEffort;
use crate::error::{Result, TransvoxError};
use crate::media_source::{parse_reference, url_extension, MediaMetadata, MediaReference, Platform};
use base64::Engine;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Extensions accepted as audio without a warning.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg", "flac", "opus", "webm"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Video details returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub platform: Platform,
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_title: String,
    pub duration_sec: i64,
    pub published_at: Option<String>,
    /// Displayable thumbnail; locally stored images are inlined as data URLs.
    pub thumbnail_url: String,
    pub audio_url: String,
}

/// Structural check of an audio reference.
///
/// Accepts a managed local path (leading `/`) or an absolute URL with scheme
/// and host. An unexpected extension only warns.
pub fn validate_audio_reference(reference: &str) -> Result<()> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(TransvoxError::InvalidAudioReference("empty reference".into()));
    }

    let structural = if reference.starts_with('/') && !reference.starts_with("//") {
        true
    } else {
        url::Url::parse(reference)
            .map(|u| !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()))
            .unwrap_or(false)
    };
    if !structural {
        return Err(TransvoxError::InvalidAudioReference(format!(
            "not a local path or absolute URL: {}",
            reference
        )));
    }

    let known = url_extension(reference).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()));
    if !known {
        warn!(reference, "Audio reference has no known audio extension");
    }
    Ok(())
}

fn backfill_from(meta: &MediaMetadata) -> VideoBackfill {
    VideoBackfill {
        title: meta.title.clone(),
        description: meta.description.clone().unwrap_or_default(),
        channel_title: meta.author.clone(),
        duration_sec: meta.duration_seconds.map(i64::from).unwrap_or(0),
        published_at: meta.publish_date.clone(),
        thumbnail_url: meta.thumbnail_url.clone().unwrap_or_default(),
    }
}

/// A row that could not be persisted; id 0 marks it as unsaved.
fn transient_record(platform: Platform, video_id: &str, meta: &VideoBackfill) -> VideoRecord {
    VideoRecord {
        id: 0,
        platform: platform.as_str().to_string(),
        video_id: video_id.to_string(),
        title: meta.title.clone(),
        description: meta.description.clone(),
        channel_title: meta.channel_title.clone(),
        duration_sec: meta.duration_sec,
        published_at: meta.published_at.clone(),
        thumbnail_url: meta.thumbnail_url.clone(),
        audio_url: String::new(),
        status: 0,
    }
}

fn audio_mime(ext: &str) -> &'static str {
    match ext {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "audio/mp4",
    }
}

fn image_mime(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

impl Orchestrator {
    /// Resolve video details, creating or backfilling the stored row.
    #[instrument(skip(self, ctx))]
    pub async fn resolve_video(&self, ctx: &CallContext, reference: &str) -> Result<VideoInfo> {
        let parsed = parse_reference(reference)?;
        let record = self.resolve_record(ctx, &parsed).await?;
        Ok(self.present(record).await)
    }

    /// Cache-first resolution of the video row, with thumbnail mirroring.
    pub(super) async fn resolve_record(
        &self,
        ctx: &CallContext,
        parsed: &MediaReference,
    ) -> Result<VideoRecord> {
        enter(AsrStage::ResolveVideo.as_str());
        let platform = parsed.platform;

        let cached = self
            .stored_video(platform, &parsed.video_id)
            .best_effort("find_video")
            .flatten();

        let record = match cached {
            Some(video) if video.is_complete() => {
                debug!(id = video.id, "Video cache hit");
                video
            }
            Some(video) => {
                // Backfill is bookkeeping: keep what we have if the source fails
                match self.fetch_metadata(ctx, parsed).await {
                    Ok(meta) => self
                        .db
                        .upsert_video(platform.as_str(), &video.video_id, &backfill_from(&meta))
                        .best_effort("backfill_video")
                        .unwrap_or(video),
                    Err(e) => {
                        warn!(error = %e, "Backfill resolution failed, using stored row");
                        video
                    }
                }
            }
            None => {
                let meta = self.fetch_metadata(ctx, parsed).await?;
                let video_id = if meta.id.is_empty() { parsed.video_id.clone() } else { meta.id.clone() };
                let backfill = backfill_from(&meta);
                let record = self
                    .db
                    .upsert_video(platform.as_str(), &video_id, &backfill)
                    .best_effort("create_video")
                    .unwrap_or_else(|| transient_record(platform, &video_id, &backfill));

                // Short links resolve to the canonical id; remember the mapping
                if record.id > 0 && video_id != parsed.video_id {
                    self.db
                        .add_video_alias(platform.as_str(), &parsed.video_id, record.id)
                        .best_effort("add_video_alias");
                }
                record
            }
        };

        Ok(self.mirror_thumbnail(ctx, record).await)
    }

    /// Row stored under `video_id`, either as its own id or as an alias.
    pub(super) fn stored_video(&self, platform: Platform, video_id: &str) -> Result<Option<VideoRecord>> {
        match self.db.find_video(platform.as_str(), video_id)? {
            Some(video) => Ok(Some(video)),
            None => self.db.find_video_by_alias(platform.as_str(), video_id),
        }
    }

    async fn fetch_metadata(&self, ctx: &CallContext, parsed: &MediaReference) -> Result<MediaMetadata> {
        info!("Fetching metadata for {}", parsed.video_id);
        ctx.bound(
            "resolve",
            self.settings.timeouts.resolve(),
            self.source.resolve_metadata(&parsed.locator, parsed.platform),
        )
        .await
        .map_err(|e| match e {
            TransvoxError::UpstreamResolveFailed(_) => e,
            other => TransvoxError::UpstreamResolveFailed(other.to_string()),
        })
    }

    /// Copy a remote thumbnail into the store once and point the row at it.
    async fn mirror_thumbnail(&self, ctx: &CallContext, mut record: VideoRecord) -> VideoRecord {
        let remote = record.thumbnail_url.clone();
        if remote.is_empty() || self.uploader.is_managed(&remote) {
            return record;
        }

        let ext = url_extension(&remote)
            .filter(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| "jpg".to_string());
        let key = format!("thumbs/{}/{}.{}", record.platform, record.video_id, ext);

        let Some(mirrored) = self
            .uploader
            .fetch_remote(ctx, &key, &remote)
            .await
            .best_effort("mirror_thumbnail")
        else {
            return record;
        };

        if record.id > 0 {
            let replaced = self
                .db
                .replace_thumbnail(record.id, &remote, &mirrored)
                .best_effort("save_thumbnail");
            debug!(?replaced, "Mirrored thumbnail to {}", key);
        }
        record.thumbnail_url = mirrored;
        record
    }

    /// Build the caller view; locally stored thumbnails become data URLs.
    pub(super) async fn present(&self, record: VideoRecord) -> VideoInfo {
        let mut thumbnail_url = record.thumbnail_url.clone();
        if thumbnail_url.starts_with('/') {
            if let Some(Some(bytes)) = self
                .uploader
                .read_managed(&thumbnail_url)
                .await
                .best_effort("inline_thumbnail")
            {
                let ext = url_extension(&thumbnail_url).unwrap_or_default();
                thumbnail_url = format!(
                    "data:{};base64,{}",
                    image_mime(&ext),
                    base64::engine::general_purpose::STANDARD.encode(&bytes)
                );
            }
        }

        VideoInfo {
            platform: record.platform.parse().unwrap_or(Platform::YouTube),
            video_id: record.video_id,
            title: record.title,
            description: record.description,
            channel_title: record.channel_title,
            duration_sec: record.duration_sec,
            published_at: record.published_at,
            thumbnail_url,
            audio_url: record.audio_url,
        }
    }

    /// Produce a fetchable audio reference for the video.
    ///
    /// Order: stored managed copy, server-side fetch of the best stream URL,
    /// local download then upload, and finally the direct stream URL unpersisted.
    pub(super) async fn acquire_audio(
        &self,
        ctx: &CallContext,
        parsed: &MediaReference,
        record: &VideoRecord,
    ) -> Result<String> {
        enter(AsrStage::AcquireAudio.as_str());

        if !record.audio_url.is_empty() && self.uploader.is_managed(&record.audio_url) {
            debug!("Reusing stored audio");
            return Ok(record.audio_url.clone());
        }

        let platform = parsed.platform;
        let audio_ctx = ctx.child(self.settings.timeouts.audio());
        let audio_key = |ext: &str| format!("audio/{}/{}.{}", platform, record.video_id, ext);

        let direct = audio_ctx
            .bound(
                "audio_url",
                self.settings.timeouts.audio(),
                self.source.best_audio_url(&parsed.locator, platform),
            )
            .await
            .best_effort("best_audio_url");

        if let Some(url) = &direct {
            let ext = url_extension(url)
                .filter(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or_else(|| "m4a".to_string());
            if let Some(stored) = self
                .uploader
                .fetch_remote(&audio_ctx, &audio_key(&ext), url)
                .await
                .best_effort("fetch_audio")
            {
                self.remember_audio(record, &stored);
                return Ok(stored);
            }
        }

        match self.download_and_store(&audio_ctx, parsed, &audio_key).await {
            Ok(stored) => {
                self.remember_audio(record, &stored);
                return Ok(stored);
            }
            Err(e) => warn!(error = %e, "Audio download path failed"),
        }

        match direct {
            Some(url) => {
                warn!("Storage unavailable, using the direct stream URL");
                Ok(url)
            }
            None => Err(TransvoxError::UpstreamAudioFailed(format!(
                "no audio for {}/{}",
                platform, record.video_id
            ))),
        }
    }

    async fn download_and_store(
        &self,
        ctx: &CallContext,
        parsed: &MediaReference,
        audio_key: &dyn Fn(&str) -> String,
    ) -> Result<String> {
        let temp_root = self.settings.temp_dir();
        tokio::fs::create_dir_all(&temp_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix("transvox-audio-")
            .tempdir_in(&temp_root)?;

        let path = ctx
            .bound(
                "download",
                self.settings.timeouts.audio(),
                self.source
                    .download_audio(&parsed.locator, parsed.platform, &workdir.path().join("audio")),
            )
            .await?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "m4a".to_string());
        self.uploader
            .put_file(ctx, &audio_key(&ext), &path, audio_mime(&ext))
            .await
    }

    fn remember_audio(&self, record: &VideoRecord, audio_url: &str) {
        if record.id > 0 {
            self.db
                .set_video_audio(record.id, audio_url)
                .best_effort("save_audio_url");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::fakes::harness;

    #[test]
    fn test_validate_audio_reference() {
        assert!(validate_audio_reference("/static/audio/youtube/abc.m4a").is_ok());
        assert!(validate_audio_reference("https://cdn.test/a.mp3?sig=1").is_ok());
        assert!(validate_audio_reference("https://rr1.googlevideo.com/videoplayback").is_ok());

        for bad in ["", "   ", "audio.mp3", "mailto:someone@example.com", "//cdn.test/a.mp3"] {
            assert!(
                matches!(validate_audio_reference(bad), Err(TransvoxError::InvalidAudioReference(_))),
                "{:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_row_and_mirrors_thumbnail_once() {
        let h = harness();
        let ctx = CallContext::background();

        let info = h.orchestrator.resolve_video(&ctx, "dQw4w9WgXcQ").await.unwrap();
        assert_eq!(info.title, "Never Gonna Give You Up");
        assert_eq!(info.thumbnail_url, "https://bucket.test/thumbs/youtube/dQw4w9WgXcQ.jpg");
        assert!(h.store.object("thumbs/youtube/dQw4w9WgXcQ.jpg").is_some());

        h.orchestrator.resolve_video(&ctx, "https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(h.source.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn test_short_link_hits_cache_after_first_resolution() {
        let h = harness();
        let ctx = CallContext::background();

        let first = h.orchestrator.resolve_video(&ctx, "https://b23.tv/aBc123").await.unwrap();
        assert_eq!(first.video_id, "BV1GJ411x7h7");
        assert_eq!(h.source.metadata_calls(), 1);

        let again = h.orchestrator.resolve_video(&ctx, "https://b23.tv/aBc123").await.unwrap();
        assert_eq!(again, first);
        h.orchestrator.resolve_video(&ctx, "BV1GJ411x7h7").await.unwrap();
        assert_eq!(h.source.metadata_calls(), 1);

        assert!(h.db.find_video("bilibili", "aBc123").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_link_to_known_video_reuses_row() {
        let h = harness();
        let ctx = CallContext::background();

        h.orchestrator.resolve_video(&ctx, "BV1GJ411x7h7").await.unwrap();
        let row = h.db.find_video("bilibili", "BV1GJ411x7h7").unwrap().unwrap();

        // The short code is unknown once, then served from the store
        h.orchestrator.resolve_video(&ctx, "https://b23.tv/xYz789").await.unwrap();
        h.orchestrator.resolve_video(&ctx, "https://b23.tv/xYz789").await.unwrap();
        assert_eq!(h.source.metadata_calls(), 2);

        let aliased = h.db.find_video_by_alias("bilibili", "xYz789").unwrap().unwrap();
        assert_eq!(aliased.id, row.id);
    }

    #[tokio::test]
    async fn test_backfill_keeps_populated_fields() {
        let h = harness();
        let ctx = CallContext::background();

        h.db.upsert_video(
            "youtube",
            "dQw4w9WgXcQ",
            &VideoBackfill {
                title: "Stored title".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let info = h.orchestrator.resolve_video(&ctx, "dQw4w9WgXcQ").await.unwrap();
        assert_eq!(info.title, "Stored title");
        assert_eq!(info.channel_title, "Rick Astley");
        assert!(info.thumbnail_url.ends_with("thumbs/youtube/dQw4w9WgXcQ.jpg"));
        assert_eq!(h.source.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_without_row() {
        let h = harness();
        h.source.fail_metadata();

        let err = h
            .orchestrator
            .resolve_video(&CallContext::background(), "dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::UpstreamResolveFailed(_)));
    }

    #[tokio::test]
    async fn test_acquire_audio_prefers_server_side_fetch() {
        let h = harness();
        let ctx = CallContext::background();
        let parsed = parse_reference("dQw4w9WgXcQ").unwrap();
        let record = h.orchestrator.resolve_record(&ctx, &parsed).await.unwrap();

        let audio = h.orchestrator.acquire_audio(&ctx, &parsed, &record).await.unwrap();
        assert_eq!(audio, "https://bucket.test/audio/youtube/dQw4w9WgXcQ.m4a");
        assert!(h.store.object("audio/youtube/dQw4w9WgXcQ.m4a").is_some());
        assert_eq!(h.source.download_calls(), 0);

        let stored = h.db.find_video("youtube", "dQw4w9WgXcQ").unwrap().unwrap();
        assert_eq!(stored.audio_url, audio);
        let again = h.orchestrator.acquire_audio(&ctx, &parsed, &stored).await.unwrap();
        assert_eq!(again, audio);
    }

    #[tokio::test]
    async fn test_acquire_audio_falls_back_to_download() {
        let h = harness();
        h.source.fail_audio_url();
        let ctx = CallContext::background();
        let parsed = parse_reference("dQw4w9WgXcQ").unwrap();
        let record = h.orchestrator.resolve_record(&ctx, &parsed).await.unwrap();

        let audio = h.orchestrator.acquire_audio(&ctx, &parsed, &record).await.unwrap();
        assert_eq!(audio, "https://bucket.test/audio/youtube/dQw4w9WgXcQ.webm");
        assert_eq!(h.store.object("audio/youtube/dQw4w9WgXcQ.webm").unwrap().as_ref(), b"downloaded audio");
        assert_eq!(h.source.download_calls(), 1);
    }

    #[tokio::test]
    async fn test_acquire_audio_fails_without_any_path() {
        let h = harness();
        h.source.fail_audio_url();
        h.source.fail_download();
        let ctx = CallContext::background();
        let parsed = parse_reference("dQw4w9WgXcQ").unwrap();
        let record = h.orchestrator.resolve_record(&ctx, &parsed).await.unwrap();

        let err = h.orchestrator.acquire_audio(&ctx, &parsed, &record).await.unwrap_err();
        assert!(matches!(err, TransvoxError::UpstreamAudioFailed(_)));
    }
}
