//! CLI module for Transvox.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Transvox - metered video transcription, translation and speech synthesis
///
/// Resolves a video, transcribes and translates its audio, synthesizes speech
/// from text, and charges every call against prepaid character packages.
#[derive(Parser, Debug)]
#[command(name = "transvox")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TRANSVOX_CONFIG")]
    pub config: Option<String>,

    /// Overall request deadline in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check system requirements and configuration
    Doctor,

    /// Show video details (resolves and stores metadata)
    Info {
        /// YouTube or Bilibili URL, or a bare video id
        input: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Transcribe and translate a video
    Transcribe {
        /// YouTube or Bilibili URL, or a bare video id
        input: String,

        /// Caller identity to meter (guest when omitted)
        #[arg(short, long, default_value = "")]
        user: String,

        /// Target language (defaults to translation.target_language)
        #[arg(short, long)]
        lang: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show a stored transcript without running the pipeline
    Transcript {
        /// YouTube or Bilibili URL, or a bare video id
        input: String,

        /// Transcript language
        #[arg(short, long)]
        lang: Option<String>,
    },

    /// Synthesize speech from text
    Synthesize {
        /// Text to speak
        text: String,

        /// Caller identity to meter (guest when omitted)
        #[arg(short, long, default_value = "")]
        user: String,

        /// Catalog voice (defaults to tts.default_speaker)
        #[arg(long)]
        voice: Option<String>,

        /// Use the caller's registered personalized voice
        #[arg(long, conflicts_with = "voice")]
        my_voice: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Issue the seed package to a list of identities (replaces earlier seed grants)
    Seed {
        /// Identities to seed
        #[arg(required = true)]
        identities: Vec<String>,

        /// ASR characters per grant
        #[arg(long, default_value = "10000")]
        asr: i64,

        /// TTS characters per grant
        #[arg(long, default_value = "10000")]
        tts: i64,
    },

    /// Add a top-up grant for one identity
    Grant {
        identity: String,

        /// Package name
        #[arg(short, long, default_value = "topup")]
        package: String,

        #[arg(long, default_value = "0")]
        asr: i64,

        #[arg(long, default_value = "0")]
        tts: i64,

        /// Validity in days (never expires when omitted)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show remaining balances per grant
    Balance { identity: String },

    /// Show daily usage counters
    Usage {
        /// Identity (guest when omitted)
        #[arg(default_value = "")]
        identity: String,

        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// List synthesis history, newest first
    History {
        identity: String,

        #[arg(short, long, default_value = "1")]
        page: u32,

        #[arg(short, long, default_value = "20")]
        size: u32,
    },

    /// Manage personalized voices
    Voice {
        #[command(subcommand)]
        action: VoiceAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum VoiceAction {
    /// Register the cloned voice id of an identity
    Set { identity: String, voice_id: String },

    /// Show the registered voice of an identity
    Show { identity: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "translation.target_language")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
