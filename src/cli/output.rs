//! CLI output formatting utilities.

use crate::orchestrator::VideoInfo;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print video details.
    pub fn video_info(video: &VideoInfo) {
        println!(
            "  {} {} ({}/{}, {})",
            style("*").cyan(),
            style(&video.title).bold(),
            video.platform,
            style(&video.video_id).dim(),
            format_duration(video.duration_sec as f64)
        );
        if !video.channel_title.is_empty() {
            Output::kv("Channel", &video.channel_title);
        }
        if let Some(published) = &video.published_at {
            Output::kv("Published", published);
        }
        if !video.thumbnail_url.is_empty() {
            Output::kv("Thumbnail", &content_preview(&video.thumbnail_url, 80));
        }
        if !video.audio_url.is_empty() {
            Output::kv("Audio", &video.audio_url);
        }
    }

    /// Print one history entry.
    pub fn history_entry(created_at: &str, voice: &str, chars: i64, preview: &str, url: &str) {
        println!(
            "\n{} {} ({}, {} chars)",
            style(">>").green(),
            style(created_at).cyan(),
            style(voice).dim(),
            chars
        );
        println!("   {}", content_preview(preview, 120));
        println!("   {}", style(content_preview(url, 100)).dim());
    }

    /// Create a byte-transfer progress bar.
    pub fn upload_bar(total: Option<u64>, msg: &str) -> ProgressBar {
        let pb = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format duration in seconds to a human-readable string.
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate content with ellipsis.
pub(crate) fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let head: String = content.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
