//! yt-dlp backed media source.

use super::{MediaMetadata, MediaSource, Platform};
use crate::config::MediaSettings;
use crate::error::{Result, TransvoxError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Media source that shells out to yt-dlp.
pub struct YtDlpSource {
    binary: String,
    format: String,
    cookies: HashMap<String, PathBuf>,
}

impl YtDlpSource {
    pub fn new(settings: &MediaSettings) -> Self {
        let cookies = settings
            .cookies
            .iter()
            .filter(|(_, path)| !path.trim().is_empty())
            .map(|(platform, path)| {
                (
                    platform.to_lowercase(),
                    crate::config::Settings::expand_path(path),
                )
            })
            .collect();

        Self {
            binary: settings.ytdlp_path.clone(),
            format: settings.audio_format.clone(),
            cookies,
        }
    }

    /// Base invocation: single item only, plus the platform's cookie file.
    fn command(&self, platform: Platform) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist")
            .arg("--no-warnings")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(cookies) = self.cookies.get(platform.as_str()) {
            debug!(%platform, "Using cookie file");
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<Vec<u8>> {
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransvoxError::ToolNotFound(self.binary.clone())
            } else {
                TransvoxError::ToolFailed(format!("Failed to run yt-dlp: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransvoxError::ToolFailed(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Map yt-dlp's `-J` output to [`MediaMetadata`].
pub(crate) fn parse_metadata(json: &serde_json::Value) -> MediaMetadata {
    let text = |key: &str| json[key].as_str().map(str::trim).filter(|s| !s.is_empty());

    let author = text("uploader")
        .or_else(|| text("channel"))
        .unwrap_or_default()
        .to_string();

    // A single thumbnail wins; otherwise take the largest of the list
    let thumbnail_url = text("thumbnail").map(str::to_string).or_else(|| {
        json["thumbnails"]
            .as_array()?
            .iter()
            .filter_map(|t| {
                let url = t["url"].as_str()?;
                let area = t["width"].as_u64().unwrap_or(0) * t["height"].as_u64().unwrap_or(0);
                Some((area, url))
            })
            .max_by_key(|(area, _)| *area)
            .map(|(_, url)| url.to_string())
    });

    let publish_date = text("upload_date")
        .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y%m%d").ok())
        .or_else(|| {
            json["timestamp"]
                .as_i64()
                .filter(|ts| *ts > 0)
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive())
        })
        .map(|d| d.format("%Y-%m-%d").to_string());

    MediaMetadata {
        id: text("id").unwrap_or_default().to_string(),
        title: text("title").unwrap_or_default().to_string(),
        author,
        description: text("description").map(str::to_string),
        duration_seconds: json["duration"].as_f64().map(|d| d as u32),
        view_count: json["view_count"].as_u64(),
        publish_date,
        thumbnail_url,
    }
}

/// Locates a downloaded file named `<stem>.<ext>`.
fn find_downloaded(dir: &Path, stem: &str) -> Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem)
            && path.extension().is_some_and(|ext| ext != "part" && ext != "ytdl");
        if !matches {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| TransvoxError::ToolFailed("Audio file not found after download".into()))
}

#[async_trait]
impl MediaSource for YtDlpSource {
    #[instrument(skip(self))]
    async fn resolve_metadata(&self, reference: &str, platform: Platform) -> Result<MediaMetadata> {
        let mut cmd = self.command(platform);
        cmd.arg("-J").arg(reference);

        let stdout = self.run(cmd).await?;
        let json: serde_json::Value = serde_json::from_slice(&stdout)?;
        let metadata = parse_metadata(&json);

        if metadata.id.is_empty() {
            return Err(TransvoxError::ToolFailed(
                "yt-dlp returned metadata without an id".into(),
            ));
        }
        debug!(id = %metadata.id, "Resolved metadata");
        Ok(metadata)
    }

    #[instrument(skip(self))]
    async fn best_audio_url(&self, reference: &str, platform: Platform) -> Result<String> {
        let mut cmd = self.command(platform);
        cmd.arg("-f").arg(&self.format).arg("-g").arg(reference);

        let stdout = self.run(cmd).await?;
        let url = String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransvoxError::ToolFailed("yt-dlp returned no audio URL".into()))?;
        Ok(url)
    }

    #[instrument(skip(self, dest_base))]
    async fn download_audio(
        &self,
        reference: &str,
        platform: Platform,
        dest_base: &Path,
    ) -> Result<PathBuf> {
        let dir = dest_base
            .parent()
            .ok_or_else(|| TransvoxError::InvalidInput(format!("No parent for {:?}", dest_base)))?;
        let stem = dest_base
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| TransvoxError::InvalidInput(format!("Bad download base {:?}", dest_base)))?;
        tokio::fs::create_dir_all(dir).await?;

        let template = format!("{}.%(ext)s", dest_base.display());
        let mut cmd = self.command(platform);
        cmd.arg("-f")
            .arg(&self.format)
            .arg("--quiet")
            .arg("--output")
            .arg(&template)
            .arg(reference)
            .stdout(Stdio::null());

        info!("Downloading audio");
        self.run(cmd).await?;

        find_downloaded(dir, stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metadata_youtube_shape() {
        let meta = parse_metadata(&json!({
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "uploader": "",
            "channel": "Rick Astley",
            "duration": 212.4,
            "view_count": 1_500_000_000u64,
            "upload_date": "20091025",
            "thumbnails": [
                {"url": "https://i.ytimg.com/small.jpg", "width": 120, "height": 90},
                {"url": "https://i.ytimg.com/max.jpg", "width": 1280, "height": 720},
                {"url": "https://i.ytimg.com/nosize.webp"}
            ]
        }));

        assert_eq!(meta.author, "Rick Astley");
        assert_eq!(meta.duration_seconds, Some(212));
        assert_eq!(meta.publish_date.as_deref(), Some("2009-10-25"));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://i.ytimg.com/max.jpg"));
    }

    #[test]
    fn test_parse_metadata_bilibili_shape() {
        let meta = parse_metadata(&json!({
            "id": "BV1GJ411x7h7",
            "title": "视频",
            "uploader": "up主",
            "timestamp": 1_700_000_000,
            "thumbnail": "http://i0.hdslb.com/bfs/archive/cover.jpg"
        }));

        assert_eq!(meta.author, "up主");
        assert_eq!(meta.publish_date.as_deref(), Some("2023-11-14"));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("http://i0.hdslb.com/bfs/archive/cover.jpg"));
        assert_eq!(meta.duration_seconds, None);
    }

    #[test]
    fn test_find_downloaded_ignores_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.webm.part"), b"x").unwrap();
        std::fs::write(dir.path().join("abc.m4a"), b"x").unwrap();
        std::fs::write(dir.path().join("other.mp3"), b"x").unwrap();

        let found = find_downloaded(dir.path(), "abc").unwrap();
        assert_eq!(found, dir.path().join("abc.m4a"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_not_found() {
        let settings = MediaSettings {
            ytdlp_path: "transvox-no-such-ytdlp".into(),
            ..Default::default()
        };
        let source = YtDlpSource::new(&settings);
        let err = source
            .best_audio_url("dQw4w9WgXcQ", Platform::YouTube)
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::ToolNotFound(_)));
    }
}
