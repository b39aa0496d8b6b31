//! Speech collaborators: recognition, translation and synthesis.
//!
//! The orchestrator only sees the traits here. Concrete clients talk to an
//! OpenAI-compatible API (Whisper, chat completion) and to a streaming
//! synthesis endpoint.

mod translate;
mod tts;
mod whisper;

pub use translate::ChatTranslator;
pub use tts::StreamingSynthesizer;
pub use whisper::WhisperRecognizer;

use crate::error::{Result, TransvoxError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio handed to a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioInput {
    /// A URL the recognizer fetches itself.
    Url(String),
    /// Bytes already held by the caller.
    Inline { bytes: Bytes, filename: String },
}

/// One recognized utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Output of speech recognition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    pub utterances: Vec<Utterance>,
}

impl Recognition {
    /// The full text, rebuilt from utterances when the top-level text is empty.
    pub fn full_text(&self) -> String {
        let text = self.text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        self.utterances
            .iter()
            .map(|u| u.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Audio produced by a synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub audio: Bytes,
    /// Upstream-hosted copy of the audio, when the service provides one.
    pub audio_url: Option<String>,
    pub request_id: String,
}

/// Why a synthesis call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisFailure {
    /// The voice does not belong to the requested resource profile.
    #[error("voice/resource mismatch: {0}")]
    ResourceMismatch(String),

    #[error("{0}")]
    Upstream(String),
}

impl From<SynthesisFailure> for TransvoxError {
    fn from(failure: SynthesisFailure) -> Self {
        TransvoxError::UpstreamSynthesizeFailed(failure.to_string())
    }
}

/// Speech-to-text service.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, audio: AudioInput) -> Result<Recognition>;
}

/// Text translation service.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;
}

/// Text-to-speech service.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        resource: &str,
    ) -> std::result::Result<SynthesizedAudio, SynthesisFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_falls_back_to_utterances() {
        let recognition = Recognition {
            text: "  ".into(),
            utterances: vec![
                Utterance { text: "hello".into(), start_ms: 0, end_ms: 400 },
                Utterance { text: " world ".into(), start_ms: 400, end_ms: 900 },
            ],
        };
        assert_eq!(recognition.full_text(), "hello world");
    }

    #[test]
    fn test_mismatch_maps_to_synthesize_failure() {
        let err: TransvoxError = SynthesisFailure::ResourceMismatch("rec_abc".into()).into();
        assert!(matches!(err, TransvoxError::UpstreamSynthesizeFailed(_)));
    }
}
