//! Streaming speech synthesis client.
//!
//! The endpoint answers with newline-delimited JSON frames. Audio arrives as
//! base64 `data` chunks; code `20000000` ends a successful stream and code
//! `55000000` mentioning "resource" reports a voice/resource mismatch.

use super::{SynthesisFailure, SynthesizedAudio, Synthesizer};
use crate::config::TtsSettings;
use async_trait::async_trait;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

const CODE_SUCCESS: i64 = 20_000_000;
const CODE_RESOURCE_ERROR: i64 = 55_000_000;

/// One NDJSON frame of the synthesis stream.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frame {
    code: i64,
    message: String,
    data: String,
}

/// What a frame did to the stream.
#[derive(Debug, PartialEq)]
enum Step {
    Continue,
    Finished,
    Mismatch(String),
}

/// Accumulates audio from a sequence of raw stream chunks.
#[derive(Default)]
struct StreamAssembly {
    pending: BytesMut,
    audio: BytesMut,
}

impl StreamAssembly {
    /// Feed raw bytes; returns the terminal step if a complete frame ended the stream.
    fn push(&mut self, chunk: &[u8]) -> Step {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(pos + 1);
            let step = self.line(&line);
            if step != Step::Continue {
                return step;
            }
        }
        Step::Continue
    }

    /// Flush a trailing line without newline.
    fn finish(&mut self) -> Step {
        let rest = self.pending.split();
        self.line(&rest)
    }

    fn line(&mut self, line: &[u8]) -> Step {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Step::Continue;
        }
        // Unparseable lines are skipped, the stream may carry keep-alives
        let Ok(frame) = serde_json::from_slice::<Frame>(line) else {
            return Step::Continue;
        };

        if !frame.data.is_empty() {
            match base64::engine::general_purpose::STANDARD.decode(frame.data.as_bytes()) {
                Ok(chunk) => self.audio.extend_from_slice(&chunk),
                Err(e) => warn!(error = %e, "Dropping undecodable audio chunk"),
            }
        }

        if frame.code == CODE_SUCCESS {
            Step::Finished
        } else if frame.code == CODE_RESOURCE_ERROR
            && frame.message.to_lowercase().contains("resource")
        {
            Step::Mismatch(frame.message)
        } else {
            Step::Continue
        }
    }

    fn into_audio(self) -> Bytes {
        self.audio.freeze()
    }
}

/// Language hint derived from the voice name; cloned voices get the multilingual front end.
fn explicit_language(voice: &str) -> &'static str {
    let voice = voice.to_lowercase();
    if voice.starts_with("zh_") || voice.contains("chinese") {
        "zh"
    } else if voice.starts_with("en_") || voice.contains("english") {
        "en"
    } else if voice.starts_with("ja_") || voice.contains("japanese") {
        "ja"
    } else {
        "zh,en,ja,es-mx,id,pt-br,de,fr"
    }
}

/// Synthesizer for the streaming HTTP endpoint.
pub struct StreamingSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    app_id: String,
    access_key: String,
}

impl StreamingSynthesizer {
    pub fn new(settings: &TtsSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: settings.endpoint.clone(),
            app_id: settings.app_id.clone(),
            access_key: settings.access_key.clone(),
        }
    }

    fn payload(&self, text: &str, voice: &str) -> serde_json::Value {
        // `additions` is a JSON string, not an object
        let additions = json!({
            "enable_language_detector": true,
            "explicit_language": explicit_language(voice),
            "disable_markdown_filter": true,
        })
        .to_string();

        json!({
            "user": { "uid": self.app_id },
            "req_params": {
                "text": text,
                "speaker": voice,
                "audio_params": {
                    "format": "mp3",
                    "sample_rate": 24000,
                    "enable_timestamp": true,
                },
                "additions": additions,
            }
        })
    }
}

#[async_trait]
impl Synthesizer for StreamingSynthesizer {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        resource: &str,
    ) -> Result<SynthesizedAudio, SynthesisFailure> {
        if self.app_id.is_empty() || self.access_key.is_empty() {
            return Err(SynthesisFailure::Upstream("missing synthesis credentials".into()));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Api-App-Id", &self.app_id)
            .header("X-Api-Access-Key", &self.access_key)
            .header("X-Api-Resource-Id", resource)
            .header("X-Api-Request-Id", &request_id)
            .json(&self.payload(text, voice))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SynthesisFailure::Upstream(e.to_string()))?;

        let mut assembly = StreamAssembly::default();
        let mut stream = response.bytes_stream();
        let mut step = Step::Continue;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SynthesisFailure::Upstream(e.to_string()))?;
            step = assembly.push(&chunk);
            if step != Step::Continue {
                break;
            }
        }
        if step == Step::Continue {
            step = assembly.finish();
        }

        if let Step::Mismatch(message) = step {
            warn!(voice, resource, "Voice does not match resource profile");
            return Err(SynthesisFailure::ResourceMismatch(message));
        }

        let audio = assembly.into_audio();
        if audio.is_empty() {
            return Err(SynthesisFailure::Upstream("stream carried no audio".into()));
        }
        if step != Step::Finished {
            debug!("Stream ended without a success frame");
        }

        info!(voice, resource, bytes = audio.len(), "Synthesized");
        Ok(SynthesizedAudio {
            audio,
            audio_url: None,
            request_id,
        })
    }
}
