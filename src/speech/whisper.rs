//! Whisper recognizer over an OpenAI-compatible transcription API.

use super::{AudioInput, Recognition, Recognizer, Utterance};
use crate::config::RecognitionSettings;
use crate::error::{Result, TransvoxError};
use crate::media_source::url_extension;
use crate::openai::{create_client, DEFAULT_TIMEOUT_SECS};
use async_openai::types::{AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, instrument};

/// Recognizer backed by Whisper.
pub struct WhisperRecognizer {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    http: reqwest::Client,
    model: String,
    language: Option<String>,
}

impl WhisperRecognizer {
    pub fn new(settings: &RecognitionSettings) -> Result<Self> {
        let client = create_client(
            settings.api_key.as_deref(),
            settings.api_base.as_deref(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )?;

        Ok(Self {
            client,
            http: reqwest::Client::new(),
            model: settings.model.clone(),
            language: settings.language.clone().filter(|l| !l.is_empty()),
        })
    }

    /// The transcription API only takes uploads, so remote audio is pulled first.
    async fn fetch(&self, url: &str) -> Result<(Bytes, String)> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransvoxError::UpstreamRecognizeFailed(format!("audio fetch: {}", e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransvoxError::UpstreamRecognizeFailed(format!("audio fetch: {}", e)))?;

        let filename = format!("audio.{}", url_extension(url).unwrap_or_else(|| "m4a".into()));
        Ok((bytes, filename))
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    #[instrument(skip(self, audio))]
    async fn recognize(&self, audio: AudioInput) -> Result<Recognition> {
        let (bytes, filename) = match audio {
            AudioInput::Inline { bytes, filename } => (bytes, filename),
            AudioInput::Url(url) => self.fetch(&url).await?,
        };
        debug!(bytes = bytes.len(), %filename, "Sending audio to Whisper");

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(async_openai::types::AudioInput::from_vec_u8(
                filename,
                bytes.to_vec(),
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = &self.language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| TransvoxError::UpstreamRecognizeFailed(format!("bad request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| TransvoxError::UpstreamRecognizeFailed(e.to_string()))?;

        let utterances = response
            .segments
            .unwrap_or_default()
            .into_iter()
            .map(|s| Utterance {
                text: s.text.trim().to_string(),
                start_ms: (s.start.max(0.0) * 1000.0) as u64,
                end_ms: (s.end.max(0.0) * 1000.0) as u64,
            })
            .collect::<Vec<_>>();

        debug!("Recognized {} utterances", utterances.len());
        Ok(Recognition {
            text: response.text,
            utterances,
        })
    }
}
