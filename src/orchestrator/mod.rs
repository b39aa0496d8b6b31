//! Pipeline orchestrator for Transvox.
//!
//! Two state machines share one set of collaborators:
//!
//! - transcription: `ResolveVideo → AcquireAudio → ValidateAudioReference →
//!   Recognize → Translate → Persist → Meter`
//! - synthesis: `CheckBalance → SelectVoiceResource → CacheLookup →
//!   Synthesize → PersistAudio → CacheRecord → Meter`
//!
//! Critical-path failures abort with a mapped error. Bookkeeping (history,
//! usage, backfill, deductions) goes through [`BestEffort`](crate::effects::BestEffort).

mod synthesize;
mod transcribe;
mod video;

#[cfg(test)]
mod fakes;

pub use synthesize::{SynthesizeOutcome, SynthesizeRequest};
pub use transcribe::{TranscribeOutcome, TranscribeRequest};
pub use video::{validate_audio_reference, VideoInfo, AUDIO_EXTENSIONS};

use crate::cache::IdempotencyCache;
use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::ledger::QuotaLedger;
use crate::media_source::{MediaSource, YtDlpSource};
use crate::speech::{ChatTranslator, Recognizer, StreamingSynthesizer, Synthesizer, Translator, WhisperRecognizer};
use crate::storage::{LocalObjectStore, ObjectStore, StorageUploader, UploadProgress};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, Span};

/// States of the transcription path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrStage {
    ResolveVideo,
    CacheLookup,
    AcquireAudio,
    ValidateAudioReference,
    Recognize,
    Translate,
    Persist,
    Meter,
    Done,
}

impl AsrStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsrStage::ResolveVideo => "resolve_video",
            AsrStage::CacheLookup => "cache_lookup",
            AsrStage::AcquireAudio => "acquire_audio",
            AsrStage::ValidateAudioReference => "validate_audio_reference",
            AsrStage::Recognize => "recognize",
            AsrStage::Translate => "translate",
            AsrStage::Persist => "persist",
            AsrStage::Meter => "meter",
            AsrStage::Done => "done",
        }
    }
}

/// States of the synthesis path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsStage {
    CheckBalance,
    SelectVoiceResource,
    CacheLookup,
    Synthesize,
    PersistAudio,
    CacheRecord,
    Meter,
    Done,
}

impl TtsStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsStage::CheckBalance => "check_balance",
            TtsStage::SelectVoiceResource => "select_voice_resource",
            TtsStage::CacheLookup => "cache_lookup",
            TtsStage::Synthesize => "synthesize",
            TtsStage::PersistAudio => "persist_audio",
            TtsStage::CacheRecord => "cache_record",
            TtsStage::Meter => "meter",
            TtsStage::Done => "done",
        }
    }
}

/// Record the current stage on the request span.
fn enter(stage: &'static str) {
    Span::current().record("stage", stage);
    debug!(stage, "Entering stage");
}

/// External collaborators of the pipeline.
pub struct Components {
    pub source: Arc<dyn MediaSource>,
    pub recognizer: Arc<dyn Recognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub store: Arc<dyn ObjectStore>,
}

/// The main orchestrator for the Transvox pipeline.
pub struct Orchestrator {
    settings: Settings,
    db: Arc<Database>,
    cache: IdempotencyCache,
    ledger: QuotaLedger,
    uploader: StorageUploader,
    source: Arc<dyn MediaSource>,
    recognizer: Arc<dyn Recognizer>,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl Orchestrator {
    /// Create an orchestrator wired to the configured services.
    pub fn new(settings: Settings) -> Result<Self> {
        let db = Arc::new(Database::open(&settings.sqlite_path())?);

        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            settings.storage_root(),
            &settings.storage.public_base_url,
        )?);

        let components = Components {
            source: Arc::new(YtDlpSource::new(&settings.media)),
            recognizer: Arc::new(WhisperRecognizer::new(&settings.recognition)?),
            translator: Arc::new(ChatTranslator::new(&settings.translation)?),
            synthesizer: Arc::new(StreamingSynthesizer::new(&settings.tts)),
            store,
        };

        info!(
            "Using {} for recognition and {} for translation",
            settings.recognition.model, settings.translation.model
        );
        Self::with_components(settings, db, components)
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, db: Arc<Database>, components: Components) -> Result<Self> {
        let temp_dir = settings.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;

        let uploader = StorageUploader::new(components.store, settings.checkpoint_dir(), temp_dir);
        let cache = IdempotencyCache::new(db.clone(), settings.tts.preview_chars);
        let ledger = QuotaLedger::new(
            db.clone(),
            settings.quota.seed_package.clone(),
            settings.quota.seed_days,
        );

        Ok(Self {
            settings,
            db,
            cache,
            ledger,
            uploader,
            source: components.source,
            recognizer: components.recognizer,
            translator: components.translator,
            synthesizer: components.synthesizer,
        })
    }

    /// Report upload progress on `sender`.
    pub fn with_upload_progress(mut self, sender: mpsc::Sender<UploadProgress>) -> Self {
        self.uploader = self.uploader.with_progress(sender);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    /// Register the personalized voice of `identity`.
    pub fn register_voice(&self, identity: &str, voice_id: &str) -> Result<()> {
        if identity.is_empty() || voice_id.trim().is_empty() {
            return Err(crate::error::TransvoxError::InvalidInput(
                "identity and voice id are required".into(),
            ));
        }
        self.db.upsert_voice(identity, voice_id.trim())
    }

    /// The registered personalized voice of `identity`.
    pub fn voice_of(&self, identity: &str) -> Result<Option<String>> {
        self.db.find_voice(identity)
    }
}
