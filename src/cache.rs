//! Idempotency cache for synthesis artifacts.
//!
//! Entries are keyed by `(identity, fingerprint, voice)` where the fingerprint
//! is a SHA-256 over the identity, the normalized text and the voice. A hit
//! lets the orchestrator skip the synthesis call; metering is still its job.

use crate::db::{Database, NewSynthesis, SynthesisRecord};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Collapse whitespace runs and trim, so cosmetic differences share an entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of `identity|text|voice`.
pub fn fingerprint(identity: &str, text: &str, voice: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(voice.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Unicode scalar count used for every character meter.
pub fn char_count(text: &str) -> i64 {
    text.chars().count() as i64
}

/// The artifact a fresh synthesis produced.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub audio_url: String,
    pub request_id: String,
}

/// Store-backed synthesis cache.
pub struct IdempotencyCache {
    db: Arc<Database>,
    preview_chars: usize,
}

impl IdempotencyCache {
    pub fn new(db: Arc<Database>, preview_chars: usize) -> Self {
        Self { db, preview_chars }
    }

    /// Find a previously produced artifact. Never mutates anything.
    #[instrument(skip(self, text))]
    pub fn lookup(&self, identity: &str, text: &str, voice: &str) -> Result<Option<SynthesisRecord>> {
        let hash = fingerprint(identity, text, voice);
        let hit = self.db.find_synthesis(identity, &hash, voice)?;
        debug!(hit = hit.is_some(), "Cache lookup");
        Ok(hit)
    }

    /// Persist an artifact and return the row that won.
    ///
    /// When a concurrent request already recorded the same key, its artifact
    /// is returned and `artifact` is discarded.
    #[instrument(skip(self, text, artifact))]
    pub fn record(
        &self,
        identity: &str,
        text: &str,
        voice: &str,
        artifact: &Artifact,
    ) -> Result<SynthesisRecord> {
        let entry = NewSynthesis {
            user_identity: identity.to_string(),
            text_hash: fingerprint(identity, text, voice),
            text_preview: self.preview(text),
            char_count: char_count(text),
            speaker: voice.to_string(),
            audio_url: artifact.audio_url.clone(),
            request_id: artifact.request_id.clone(),
        };
        self.db.insert_synthesis(&entry)
    }

    /// Newest-first history of an identity. `page` starts at 1.
    pub fn history(&self, identity: &str, page: u32, size: u32) -> Result<(Vec<SynthesisRecord>, i64)> {
        if identity.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let page = page.max(1) as i64;
        let size = size.clamp(1, 100) as i64;
        self.db.list_synthesis(identity, (page - 1) * size, size)
    }

    fn preview(&self, text: &str) -> String {
        text.chars().take(self.preview_chars).collect()
    }
}
