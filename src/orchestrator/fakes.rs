//! Scriptable collaborators for orchestrator tests.

use super::{Components, Orchestrator};
use crate::config::Settings;
use crate::db::Database;
use crate::error::{Result, TransvoxError};
use crate::media_source::{MediaMetadata, MediaSource, Platform};
use crate::speech::{
    AudioInput, Recognition, Recognizer, SynthesisFailure, SynthesizedAudio, Synthesizer, Translator,
};
use crate::storage::MemoryObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const THUMBNAIL: &str = "https://i.ytimg.test/vi/dQw4w9WgXcQ/maxresdefault.jpg";
pub const BILI_THUMBNAIL: &str = "http://i0.hdslb.test/bfs/archive/cover.png";
pub const AUDIO_STREAM: &str = "https://media.test/stream/audio.m4a";

#[derive(Default)]
pub struct FakeSource {
    metadata_calls: AtomicUsize,
    download_calls: AtomicUsize,
    fail_metadata: AtomicBool,
    fail_audio_url: AtomicBool,
    fail_download: AtomicBool,
}

impl FakeSource {
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn fail_metadata(&self) {
        self.fail_metadata.store(true, Ordering::SeqCst);
    }

    pub fn fail_audio_url(&self) {
        self.fail_audio_url.store(true, Ordering::SeqCst);
    }

    pub fn fail_download(&self) {
        self.fail_download.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn resolve_metadata(&self, _reference: &str, platform: Platform) -> Result<MediaMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(TransvoxError::ToolFailed("yt-dlp exited with 1".into()));
        }
        Ok(match platform {
            Platform::YouTube => MediaMetadata {
                id: "dQw4w9WgXcQ".into(),
                title: "Never Gonna Give You Up".into(),
                author: "Rick Astley".into(),
                description: Some("Official video".into()),
                duration_seconds: Some(212),
                view_count: Some(1_500_000_000),
                publish_date: Some("2009-10-25".into()),
                thumbnail_url: Some(THUMBNAIL.into()),
            },
            Platform::Bilibili => MediaMetadata {
                id: "BV1GJ411x7h7".into(),
                title: "演示视频".into(),
                author: "up主".into(),
                description: None,
                duration_seconds: Some(95),
                view_count: None,
                publish_date: Some("2023-11-14".into()),
                thumbnail_url: Some(BILI_THUMBNAIL.into()),
            },
        })
    }

    async fn best_audio_url(&self, _reference: &str, _platform: Platform) -> Result<String> {
        if self.fail_audio_url.load(Ordering::SeqCst) {
            return Err(TransvoxError::ToolFailed("no formats".into()));
        }
        Ok(AUDIO_STREAM.to_string())
    }

    async fn download_audio(&self, _reference: &str, _platform: Platform, dest_base: &Path) -> Result<PathBuf> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(TransvoxError::ToolFailed("download failed".into()));
        }
        let path = dest_base.with_extension("webm");
        tokio::fs::write(&path, b"downloaded audio").await?;
        Ok(path)
    }
}

pub struct FakeRecognizer {
    pub text: String,
    pub inputs: Mutex<Vec<AudioInput>>,
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn recognize(&self, audio: AudioInput) -> Result<Recognition> {
        self.inputs.lock().unwrap().push(audio);
        Ok(Recognition {
            text: self.text.clone(),
            utterances: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct FakeTranslator {
    calls: AtomicUsize,
}

impl FakeTranslator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{}] {}", target_language, text))
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    calls: Mutex<Vec<(String, String, String)>>,
    upstream_url: Mutex<Option<String>>,
    url_only: Mutex<bool>,
}

impl FakeSynthesizer {
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn with_upstream_url(&self, url: &str) {
        *self.upstream_url.lock().unwrap() = Some(url.to_string());
    }

    /// Answer with the upstream URL alone, carrying no audio bytes.
    pub fn url_only(&self, url: &str) {
        self.with_upstream_url(url);
        *self.url_only.lock().unwrap() = true;
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        resource: &str,
    ) -> std::result::Result<SynthesizedAudio, SynthesisFailure> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((text.to_string(), voice.to_string(), resource.to_string()));
        if voice.starts_with("mismatch") {
            return Err(SynthesisFailure::ResourceMismatch("resource ID is mismatched".into()));
        }
        let audio = if *self.url_only.lock().unwrap() {
            Bytes::new()
        } else {
            Bytes::from_static(b"ID3 fake mp3")
        };
        Ok(SynthesizedAudio {
            audio,
            audio_url: self.upstream_url.lock().unwrap().clone(),
            request_id: format!("req-{}", calls.len()),
        })
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub db: Arc<Database>,
    pub store: Arc<MemoryObjectStore>,
    pub source: Arc<FakeSource>,
    pub recognizer: Arc<FakeRecognizer>,
    pub translator: Arc<FakeTranslator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub _dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    harness_with(MemoryObjectStore::new())
}

pub fn harness_with(store: MemoryObjectStore) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.general.temp_dir = dir.path().join("tmp").to_string_lossy().into_owned();
    settings.storage.checkpoint_dir = dir.path().join("checkpoints").to_string_lossy().into_owned();

    store.serve_remote(THUMBNAIL, Bytes::from_static(b"\xff\xd8jpeg"));
    store.serve_remote(BILI_THUMBNAIL, Bytes::from_static(b"\x89PNG"));
    store.serve_remote(AUDIO_STREAM, Bytes::from_static(b"streamed audio"));

    let db = Arc::new(Database::in_memory().unwrap());
    let store = Arc::new(store);
    let source = Arc::new(FakeSource::default());
    let recognizer = Arc::new(FakeRecognizer {
        text: "hello world".into(),
        inputs: Mutex::new(Vec::new()),
    });
    let translator = Arc::new(FakeTranslator::default());
    let synthesizer = Arc::new(FakeSynthesizer::default());

    let orchestrator = Orchestrator::with_components(
        settings,
        db.clone(),
        Components {
            source: source.clone(),
            recognizer: recognizer.clone(),
            translator: translator.clone(),
            synthesizer: synthesizer.clone(),
            store: store.clone(),
        },
    )
    .unwrap();

    Harness {
        orchestrator,
        db,
        store,
        source,
        recognizer,
        translator,
        synthesizer,
        _dir: dir,
    }
}
