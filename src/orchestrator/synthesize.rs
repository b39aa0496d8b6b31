//! Synthesis path.

use super::{enter, Orchestrator, TtsStage};
use crate::cache::{char_count, fingerprint, normalize_text, Artifact};
use crate::context::CallContext;
use crate::db::{QuotaKind, UsageDelta};
use crate::effects::BestEffort;
use crate::error::{Result, TransvoxError};
use crate::ledger::GUEST_IDENTITY;
use crate::speech::SynthesizedAudio;
use base64::Engine;
use serde::Serialize;
use tracing::{info, instrument, warn};

/// A synthesis request.
#[derive(Debug, Clone, Default)]
pub struct SynthesizeRequest {
    /// Caller identity; empty for the anonymous guest.
    pub identity: String,
    pub text: String,
    /// Catalog voice; the configured default when `None`.
    pub voice: Option<String>,
    /// Use the caller's registered personalized voice.
    pub personalized: bool,
}

/// Result of a synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizeOutcome {
    pub audio_url: String,
    pub char_count: i64,
    pub voice: String,
    pub request_id: String,
    /// Served from the idempotency cache.
    pub cached: bool,
}

/// Object-key segment for an identity.
fn key_segment(identity: &str) -> String {
    let segment: String = identity
        .chars()
        .map(|c| if c == '|' || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match segment.as_str() {
        "" | "." | ".." => GUEST_IDENTITY.to_string(),
        _ => segment,
    }
}

fn data_url(audio: &[u8]) -> String {
    format!(
        "data:audio/mpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(audio)
    )
}

impl Orchestrator {
    /// Run the synthesis path.
    #[instrument(
        skip(self, ctx, request),
        fields(identity = %request.identity, stage = tracing::field::Empty)
    )]
    pub async fn synthesize(
        &self,
        ctx: &CallContext,
        request: &SynthesizeRequest,
    ) -> Result<SynthesizeOutcome> {
        let identity = request.identity.as_str();

        enter(TtsStage::CheckBalance.as_str());
        let text = normalize_text(&request.text);
        if text.is_empty() {
            return Err(TransvoxError::InvalidInput("text is empty".into()));
        }
        let need = char_count(&text);
        self.ensure_tts_balance(identity, need)?;

        // The cache key includes the effective voice, so it is resolved first
        enter(TtsStage::SelectVoiceResource.as_str());
        let (voice, resource) = self.select_voice(request)?;

        enter(TtsStage::CacheLookup.as_str());
        if let Some(hit) = self
            .cache
            .lookup(identity, &text, &voice)
            .best_effort("cache_lookup")
            .flatten()
        {
            info!(id = hit.id, "Serving cached synthesis");
            self.ensure_tts_balance(identity, hit.char_count)?;

            enter(TtsStage::Meter.as_str());
            self.meter_tts(identity, hit.char_count);

            enter(TtsStage::Done.as_str());
            return Ok(SynthesizeOutcome {
                audio_url: hit.audio_url,
                char_count: hit.char_count,
                voice,
                request_id: hit.request_id,
                cached: true,
            });
        }

        enter(TtsStage::Synthesize.as_str());
        let produced = ctx
            .bound("synthesize", self.settings.timeouts.synthesize(), async {
                self.synthesizer
                    .synthesize(&text, &voice, &resource)
                    .await
                    .map_err(TransvoxError::from)
            })
            .await
            .map_err(|e| match e {
                TransvoxError::UpstreamSynthesizeFailed(_) => e,
                other => TransvoxError::UpstreamSynthesizeFailed(other.to_string()),
            })?;

        enter(TtsStage::PersistAudio.as_str());
        let hash = fingerprint(identity, &text, &voice);
        let audio_url = self.persist_audio(ctx, identity, &hash, &produced).await;

        enter(TtsStage::CacheRecord.as_str());
        let artifact = Artifact {
            audio_url,
            request_id: produced.request_id.clone(),
        };
        // A concurrent request may have recorded first; its artifact wins
        let audio_url = self
            .cache
            .record(identity, &text, &voice, &artifact)
            .best_effort("cache_record")
            .map(|row| row.audio_url)
            .unwrap_or(artifact.audio_url);

        enter(TtsStage::Meter.as_str());
        self.meter_tts(identity, need);

        enter(TtsStage::Done.as_str());
        Ok(SynthesizeOutcome {
            audio_url,
            char_count: need,
            voice,
            request_id: artifact.request_id,
            cached: false,
        })
    }

    /// Strict pre-check; a failing ledger read does not block.
    fn ensure_tts_balance(&self, identity: &str, need: i64) -> Result<()> {
        match self.ledger.check_balance(identity, QuotaKind::Tts, need) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransvoxError::QuotaInsufficient {
                kind: QuotaKind::Tts.to_string(),
                need,
            }),
            Err(e) => {
                warn!(error = %e, "Balance check failed, not blocking");
                Ok(())
            }
        }
    }

    /// Personalized requests use the registered voice and the cloned-voice
    /// resource, with no fallback to the catalog.
    fn select_voice(&self, request: &SynthesizeRequest) -> Result<(String, String)> {
        let tts = &self.settings.tts;
        if !request.personalized {
            let voice = request
                .voice
                .clone()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| tts.default_speaker.clone());
            return Ok((voice, tts.default_resource.clone()));
        }

        if request.identity.is_empty() {
            return Err(TransvoxError::VoiceNotConfigured);
        }
        match self.db.find_voice(&request.identity) {
            Ok(Some(voice)) if !voice.is_empty() => Ok((voice, tts.cloned_voice_resource.clone())),
            Ok(_) => Err(TransvoxError::VoiceNotConfigured),
            Err(e) => {
                warn!(error = %e, "Voice lookup failed");
                Err(TransvoxError::VoiceNotConfigured)
            }
        }
    }

    /// Server-side fetch of the upstream URL, then a direct upload, then an
    /// inline data URL. Storage trouble never fails the synthesis.
    async fn persist_audio(
        &self,
        ctx: &CallContext,
        identity: &str,
        hash: &str,
        produced: &SynthesizedAudio,
    ) -> String {
        let key = format!(
            "tts/{}/{}-{}.mp3",
            key_segment(identity),
            &hash[..8],
            chrono::Utc::now().timestamp()
        );

        let upstream = produced.audio_url.as_deref().filter(|u| !u.trim().is_empty());
        if let Some(upstream) = upstream {
            if let Some(url) = self
                .uploader
                .fetch_remote(ctx, &key, upstream)
                .await
                .best_effort("fetch_tts_audio")
            {
                return url;
            }
        }

        if !produced.audio.is_empty() {
            if let Some(url) = self
                .uploader
                .put_bytes(ctx, &key, produced.audio.clone(), "audio/mpeg")
                .await
                .best_effort("upload_tts_audio")
            {
                return url;
            }
        }

        match upstream {
            // Nothing to inline; the upstream link is the only playable reference
            Some(upstream) if produced.audio.is_empty() => {
                warn!("Storage unavailable, returning upstream audio URL");
                upstream.to_string()
            }
            _ => {
                warn!("Storage unavailable, returning audio inline");
                data_url(&produced.audio)
            }
        }
    }

    fn meter_tts(&self, identity: &str, chars: i64) {
        self.ledger.record_usage(identity, UsageDelta::tts(chars));
        self.ledger
            .deduct(identity, QuotaKind::Tts, chars)
            .best_effort("deduct_tts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::QuotaLedger;
    use crate::orchestrator::fakes::{harness, harness_with, Harness};
    use crate::storage::MemoryObjectStore;

    fn request(identity: &str, text: &str, voice: &str) -> SynthesizeRequest {
        SynthesizeRequest {
            identity: identity.into(),
            text: text.into(),
            voice: Some(voice.into()),
            personalized: false,
        }
    }

    fn grant_tts(h: &Harness, identity: &str, tts: i64) {
        QuotaLedger::new(h.db.clone(), "beta_seed", 30)
            .grant(identity, "topup", 0, tts, Some(10))
            .unwrap();
    }

    fn tts_remaining(h: &Harness, identity: &str) -> i64 {
        h.orchestrator
            .ledger()
            .balances(identity)
            .unwrap()
            .iter()
            .map(|g| g.tts_remaining)
            .sum()
    }

    #[tokio::test]
    async fn test_repeat_request_hits_cache_and_meters_again() {
        let h = harness();
        grant_tts(&h, "u1", 100);
        let ctx = CallContext::background();

        let first = h
            .orchestrator
            .synthesize(&ctx, &request("u1", "hello world", "v1"))
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(first.char_count, 11);
        assert_eq!(h.synthesizer.calls().len(), 1);
        assert_eq!(tts_remaining(&h, "u1"), 89);

        let (history, total) = h.orchestrator.cache().history("u1", 1, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(history[0].char_count, 11);
        assert_eq!(history[0].speaker, "v1");

        let second = h
            .orchestrator
            .synthesize(&ctx, &request("u1", "  hello   world ", "v1"))
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.audio_url, first.audio_url);
        assert_eq!(h.synthesizer.calls().len(), 1);
        assert_eq!(tts_remaining(&h, "u1"), 78);

        let usage = h.orchestrator.ledger().usage("u1", 1).unwrap();
        assert_eq!(usage[0].tts_chars, 22);
        assert_eq!(usage[0].requests, 2);
    }

    #[tokio::test]
    async fn test_audio_is_uploaded_under_identity_key() {
        let h = harness();
        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("a|b", "hi", "v1"))
            .await
            .unwrap();

        assert!(outcome.audio_url.starts_with("https://bucket.test/tts/a_b/"));
        assert!(outcome.audio_url.ends_with(".mp3"));
        assert_eq!(h.store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_url_is_fetched_server_side() {
        let h = harness();
        h.store.serve_remote("https://tts.test/out.mp3", &b"remote mp3"[..]);
        h.synthesizer.with_upstream_url("https://tts.test/out.mp3");

        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("u1", "hi", "v1"))
            .await
            .unwrap();

        let key = outcome.audio_url.trim_start_matches("https://bucket.test/");
        assert_eq!(h.store.object(key).unwrap().as_ref(), b"remote mp3");
        assert_eq!(h.store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_storage_outage_falls_back_to_data_url() {
        let h = harness_with(MemoryObjectStore::new().failing_puts(1));

        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("u1", "hi", "v1"))
            .await
            .unwrap();

        assert!(outcome.audio_url.starts_with("data:audio/mpeg;base64,"));
        let (history, _) = h.orchestrator.cache().history("u1", 1, 10).unwrap();
        assert_eq!(history[0].audio_url, outcome.audio_url);
    }

    #[tokio::test]
    async fn test_url_only_audio_falls_back_to_upstream_url() {
        let h = harness_with(MemoryObjectStore::new().without_remote_fetch());
        h.synthesizer.url_only("http://127.0.0.1:9/out.mp3");

        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("u1", "hi", "v1"))
            .await
            .unwrap();

        assert_eq!(outcome.audio_url, "http://127.0.0.1:9/out.mp3");
        assert_eq!(h.store.object_count(), 0);
        let (history, _) = h.orchestrator.cache().history("u1", 1, 10).unwrap();
        assert_eq!(history[0].audio_url, "http://127.0.0.1:9/out.mp3");
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejects_before_synthesis() {
        let h = harness();
        grant_tts(&h, "u1", 5);

        let err = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("u1", "hello world", "v1"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransvoxError::QuotaInsufficient { need: 11, .. }));
        assert!(h.synthesizer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_guest_is_never_gated() {
        let h = harness();
        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("", "hello", "v1"))
            .await
            .unwrap();
        assert_eq!(outcome.char_count, 5);
        assert!(outcome.audio_url.contains("/tts/guest/"));
    }

    #[tokio::test]
    async fn test_personalized_voice_fails_closed() {
        let h = harness();
        let mut req = request("u1", "hello", "v1");
        req.personalized = true;

        let err = h
            .orchestrator
            .synthesize(&CallContext::background(), &req)
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::VoiceNotConfigured));
        assert!(h.synthesizer.calls().is_empty());

        h.orchestrator.register_voice("u1", "S_cloned42").unwrap();
        let outcome = h
            .orchestrator
            .synthesize(&CallContext::background(), &req)
            .await
            .unwrap();
        assert_eq!(outcome.voice, "S_cloned42");
        let (_, voice, resource) = h.synthesizer.calls().remove(0);
        assert_eq!(voice, "S_cloned42");
        assert_eq!(resource, "volc.megatts.default");
    }

    #[tokio::test]
    async fn test_resource_mismatch_is_a_synthesis_failure() {
        let h = harness();
        let err = h
            .orchestrator
            .synthesize(&CallContext::background(), &request("u1", "hello", "mismatch_voice"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransvoxError::UpstreamSynthesizeFailed(_)));
        assert_eq!(h.orchestrator.cache().history("u1", 1, 10).unwrap().1, 0);
    }

    #[test]
    fn test_key_segment() {
        assert_eq!(key_segment("13800138000"), "13800138000");
        assert_eq!(key_segment("wx|abc/def"), "wx_abc_def");
        assert_eq!(key_segment(".."), "guest");
    }
}
