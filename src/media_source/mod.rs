//! Video metadata and audio acquisition.
//!
//! `MediaSource` is the collaborator seam; [`YtDlpSource`] drives yt-dlp for
//! both supported platforms.

mod ytdlp;

pub use ytdlp::YtDlpSource;

use crate::error::{Result, TransvoxError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Video hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Bilibili,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Bilibili => "bilibili",
        }
    }

    /// Detect the platform of a URL or bare id. Unknown inputs are YouTube.
    pub fn detect(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_lowercase();
        let bare_bvid = trimmed.len() == 12 && BILIBILI_BVID.is_match(trimmed);
        if lower.contains("bilibili.com") || lower.contains("b23.tv") || bare_bvid {
            Platform::Bilibili
        } else {
            Platform::YouTube
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = TransvoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "youtube" => Ok(Platform::YouTube),
            "bilibili" => Ok(Platform::Bilibili),
            other => Err(TransvoxError::InvalidInput(format!("Unknown platform: {}", other))),
        }
    }
}

/// Metadata reported by the source for one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub duration_seconds: Option<u32>,
    pub view_count: Option<u64>,
    /// `YYYY-MM-DD`.
    pub publish_date: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// A parsed video reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub platform: Platform,
    /// Platform-native id.
    pub video_id: String,
    /// What the source is asked to resolve.
    pub locator: String,
}

static YOUTUBE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?:youtu\.be/|youtube\.com/(?:embed/|v/|shorts/)|[?&]v=)
        ([A-Za-z0-9_-]{6,})
        ",
    )
    .expect("Invalid regex")
});

static BILIBILI_BVID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(BV[0-9A-Za-z]{10})").expect("Invalid regex"));

/// Split a URL or bare id into platform, native id and locator.
pub fn parse_reference(input: &str) -> Result<MediaReference> {
    let input = input.trim();
    if input.is_empty() || input.chars().any(char::is_whitespace) {
        return Err(TransvoxError::InvalidInput(format!(
            "Not a video URL or id: {:?}",
            input
        )));
    }

    let platform = Platform::detect(input);
    let is_url = input.contains("://") || input.contains('.');

    let video_id = match platform {
        Platform::YouTube if !is_url => Some(input.to_string()),
        Platform::YouTube => YOUTUBE_ID.captures(input).map(|c| c[1].to_string()),
        Platform::Bilibili => BILIBILI_BVID
            .captures(input)
            .map(|c| c[1].to_string())
            .or_else(|| short_link_code(input)),
    };

    let video_id = video_id.ok_or_else(|| {
        TransvoxError::InvalidInput(format!("Cannot find a video id in {}", input))
    })?;

    let locator = match platform {
        Platform::YouTube => format!("https://www.youtube.com/watch?v={}", video_id),
        Platform::Bilibili if video_id.starts_with("BV") => {
            format!("https://www.bilibili.com/video/{}", video_id)
        }
        Platform::Bilibili => input.to_string(),
    };

    Ok(MediaReference {
        platform,
        video_id,
        locator,
    })
}

/// Code of a `b23.tv/<code>` short link.
fn short_link_code(input: &str) -> Option<String> {
    let rest = input.split("b23.tv/").nth(1)?;
    let code: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!code.is_empty()).then_some(code)
}

/// Lowercased extension of the last path segment of a URL, if it looks like one.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    (!ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// Source of video metadata and audio.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolve metadata for a single video (never a playlist).
    async fn resolve_metadata(&self, reference: &str, platform: Platform) -> Result<MediaMetadata>;

    /// A directly fetchable URL of the best audio stream.
    async fn best_audio_url(&self, reference: &str, platform: Platform) -> Result<String>;

    /// Download the audio stream to `dest_base.<ext>` and return the path.
    async fn download_audio(
        &self,
        reference: &str,
        platform: Platform,
        dest_base: &Path,
    ) -> Result<PathBuf>;
}
