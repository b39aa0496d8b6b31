//! Transcription path.

use super::{enter, validate_audio_reference, AsrStage, Orchestrator, VideoInfo};
use crate::cache::char_count;
use crate::config::AsrBilling;
use crate::context::CallContext;
use crate::db::{QuotaKind, TranscriptRecord, UsageDelta};
use crate::effects::BestEffort;
use crate::error::{Result, TransvoxError};
use crate::media_source::parse_reference;
use crate::speech::AudioInput;
use serde::Serialize;
use tracing::{info, instrument};

/// A transcription request.
#[derive(Debug, Clone, Default)]
pub struct TranscribeRequest {
    /// Caller identity; empty for the anonymous guest.
    pub identity: String,
    /// Video URL or platform id.
    pub reference: String,
    /// Overrides the configured target language.
    pub target_language: Option<String>,
}

/// Result of a transcription.
#[derive(Debug, Clone, Serialize)]
pub struct TranscribeOutcome {
    pub video: VideoInfo,
    pub language: String,
    pub original_text: String,
    pub translated_text: String,
    pub asr_char_count: i64,
    pub translate_char_count: i64,
    pub translated: bool,
    /// Served from a stored transcript without recognition.
    pub cached: bool,
    /// Characters deducted from the ASR balance.
    pub billed_chars: i64,
}

impl Orchestrator {
    /// Run the transcription path for one video.
    #[instrument(
        skip(self, ctx, request),
        fields(reference = %request.reference, stage = tracing::field::Empty)
    )]
    pub async fn transcribe(
        &self,
        ctx: &CallContext,
        request: &TranscribeRequest,
    ) -> Result<TranscribeOutcome> {
        let identity = request.identity.as_str();
        let parsed = parse_reference(&request.reference)?;
        let platform = parsed.platform;

        let mut record = self.resolve_record(ctx, &parsed).await?;

        let language = request
            .target_language
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.settings.translation.target_language.clone());

        enter(AsrStage::CacheLookup.as_str());
        if record.id > 0 {
            if let Some(stored) = self
                .db
                .find_transcript(record.id, &language)
                .best_effort("find_transcript")
                .flatten()
            {
                info!(language = %language, "Serving stored transcript");
                let translated = stored.translate_char_count > 0;
                let billed_chars = self.meter_transcript(
                    identity,
                    stored.asr_char_count,
                    translated.then_some(stored.translate_char_count),
                    &stored.translated_text,
                );

                enter(AsrStage::Done.as_str());
                return Ok(TranscribeOutcome {
                    video: self.present(record).await,
                    language,
                    original_text: stored.original_text,
                    translated_text: stored.translated_text,
                    asr_char_count: stored.asr_char_count,
                    translate_char_count: stored.translate_char_count,
                    translated,
                    cached: true,
                    billed_chars,
                });
            }
        }

        let audio_url = self.acquire_audio(ctx, &parsed, &record).await?;
        record.audio_url = audio_url.clone();

        enter(AsrStage::ValidateAudioReference.as_str());
        validate_audio_reference(&audio_url)?;

        enter(AsrStage::Recognize.as_str());
        let input = self.audio_input(&audio_url).await?;
        let recognition = ctx
            .bound(
                "recognize",
                self.settings.timeouts.recognize(),
                self.recognizer.recognize(input),
            )
            .await
            .map_err(|e| match e {
                TransvoxError::UpstreamRecognizeFailed(_) => e,
                other => TransvoxError::UpstreamRecognizeFailed(other.to_string()),
            })?;

        let original = recognition.full_text();
        if original.is_empty() {
            return Err(TransvoxError::UpstreamRecognizeFailed("no speech recognized".into()));
        }

        let skip_translation = self
            .settings
            .translation
            .skip_platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case(platform.as_str()));

        let translated = if skip_translation {
            info!("{} needs no translation, copying text through", platform);
            None
        } else {
            enter(AsrStage::Translate.as_str());
            let text = ctx
                .bound(
                    "translate",
                    self.settings.timeouts.translate(),
                    self.translator.translate(&original, &language),
                )
                .await
                .map_err(|e| match e {
                    TransvoxError::UpstreamTranslateFailed(_) => e,
                    other => TransvoxError::UpstreamTranslateFailed(other.to_string()),
                })?;
            Some(text)
        };

        let asr_char_count = char_count(&original);
        let translate_char_count = translated.as_deref().map(char_count).unwrap_or(0);
        let was_translated = translated.is_some();
        let delivered = translated.unwrap_or_else(|| original.clone());

        enter(AsrStage::Persist.as_str());
        if record.id > 0 {
            self.db
                .upsert_transcript(
                    record.id,
                    &language,
                    &original,
                    &delivered,
                    asr_char_count,
                    translate_char_count,
                )
                .best_effort("persist_transcript");
        }

        let billed_chars = self.meter_transcript(
            identity,
            asr_char_count,
            was_translated.then_some(translate_char_count),
            &delivered,
        );

        enter(AsrStage::Done.as_str());
        info!(asr_char_count, translate_char_count, billed_chars, "Transcription complete");

        Ok(TranscribeOutcome {
            video: self.present(record).await,
            language,
            original_text: original,
            translated_text: delivered,
            asr_char_count,
            translate_char_count,
            translated: was_translated,
            cached: false,
            billed_chars,
        })
    }

    /// Post usage and deduct ASR quota; returns the characters billed.
    fn meter_transcript(
        &self,
        identity: &str,
        asr_char_count: i64,
        translate_char_count: Option<i64>,
        delivered: &str,
    ) -> i64 {
        enter(AsrStage::Meter.as_str());
        self.ledger.record_usage(identity, UsageDelta::asr(asr_char_count));
        if let Some(count) = translate_char_count {
            self.ledger.record_usage(identity, UsageDelta::translate(count));
        }
        let billed_chars = match self.settings.quota.asr_billing {
            AsrBilling::Delivered => char_count(delivered),
            AsrBilling::Recognized => asr_char_count,
        };
        self.ledger
            .deduct(identity, QuotaKind::Asr, billed_chars)
            .best_effort("deduct_asr");
        billed_chars
    }

    /// Stored transcript of a video, if one exists.
    pub fn transcript(&self, reference: &str, language: &str) -> Result<Option<TranscriptRecord>> {
        let parsed = parse_reference(reference)?;
        let Some(video) = self.stored_video(parsed.platform, &parsed.video_id)? else {
            return Ok(None);
        };
        self.db.find_transcript(video.id, language)
    }

    /// Managed audio is sent inline; anything else is passed by URL.
    async fn audio_input(&self, audio_url: &str) -> Result<AudioInput> {
        let bytes = self
            .uploader
            .read_managed(audio_url)
            .await
            .map_err(|e| TransvoxError::UpstreamAudioFailed(e.to_string()))?;

        Ok(match bytes {
            Some(bytes) => AudioInput::Inline {
                bytes,
                filename: audio_url
                    .rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .unwrap_or("audio.m4a")
                    .to_string(),
            },
            None => AudioInput::Url(audio_url.to_string()),
        })
    }
}
