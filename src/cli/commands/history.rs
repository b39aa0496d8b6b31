//! History command implementation.

use crate::cache::IdempotencyCache;
use crate::cli::Output;
use crate::config::Settings;
use crate::db::Database;
use anyhow::Result;
use std::sync::Arc;

/// List synthesis history of an identity.
pub fn run_history(identity: &str, page: u32, size: u32, settings: Settings) -> Result<()> {
    let db = Arc::new(Database::open(&settings.sqlite_path())?);
    let cache = IdempotencyCache::new(db, settings.tts.preview_chars);

    let (entries, total) = cache.history(identity, page, size)?;

    if entries.is_empty() {
        Output::info(&format!("No synthesis history for {} on page {}.", identity, page.max(1)));
        return Ok(());
    }

    Output::header(&format!("History for {} ({} total)", identity, total));
    for entry in &entries {
        Output::history_entry(
            &entry.created_at,
            &entry.speaker,
            entry.char_count,
            &entry.text_preview,
            &entry.audio_url,
        );
    }

    let size = size.clamp(1, 100) as i64;
    let pages = (total + size - 1) / size;
    println!();
    Output::info(&format!("Page {} of {}.", page.max(1), pages.max(1)));
    Ok(())
}
