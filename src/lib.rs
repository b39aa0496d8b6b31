//! Transvox - metered video transcription and speech synthesis
//!
//! A pipeline that turns a YouTube or Bilibili link into recognized and
//! translated text, and turns text into speech, charging both against prepaid
//! character packages.
//!
//! # Overview
//!
//! Transvox allows you to:
//! - Resolve video metadata and mirror thumbnails into your own bucket
//! - Transcribe a video's audio and translate the result
//! - Synthesize speech with catalog or personalized voices, deduplicated per caller
//! - Grant, deduct and report per-user ASR and TTS character balances
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `context` - Per-request deadlines
//! - `db` - SQLite persistence for videos, transcripts, history and quota
//! - `storage` - Object store abstraction and resumable uploader
//! - `media_source` - Video reference parsing and yt-dlp resolution
//! - `speech` - Recognition, translation and synthesis clients
//! - `cache` - Idempotency cache for synthesis artifacts
//! - `ledger` - Quota ledger
//! - `orchestrator` - Transcription and synthesis state machines
//!
//! # Example
//!
//! ```rust,no_run
//! use transvox::config::Settings;
//! use transvox::context::CallContext;
//! use transvox::orchestrator::{Orchestrator, SynthesizeRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let request = SynthesizeRequest {
//!         identity: "user-1".into(),
//!         text: "Hello there".into(),
//!         ..Default::default()
//!     };
//!     let outcome = orchestrator
//!         .synthesize(&CallContext::background(), &request)
//!         .await?;
//!     println!("{} ({} chars)", outcome.audio_url, outcome.char_count);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod effects;
pub mod error;
pub mod ledger;
pub mod media_source;
pub mod openai;
pub mod orchestrator;
pub mod speech;
pub mod storage;

pub use error::{Result, TransvoxError};
