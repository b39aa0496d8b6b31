//! Configuration settings for Transvox.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub media: MediaSettings,
    pub recognition: RecognitionSettings,
    pub translation: TranslationSettings,
    pub tts: TtsSettings,
    pub quota: QuotaSettings,
    pub timeouts: TimeoutSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.transvox".to_string(),
            temp_dir: "/tmp/transvox".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.transvox/transvox.db".to_string(),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Bucket root directory.
    pub root: String,
    /// Public base URL the bucket is served under (e.g. `/static` or `https://cdn.example.com`).
    pub public_base_url: String,
    /// Directory holding resumable-upload checkpoints.
    pub checkpoint_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: "~/.transvox/bucket".to_string(),
            public_base_url: "/static".to_string(),
            checkpoint_dir: "~/.transvox/checkpoints".to_string(),
        }
    }
}

/// Video metadata and audio acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// yt-dlp executable.
    pub ytdlp_path: String,
    /// Cookie file per platform (`youtube`, `bilibili`), passed to yt-dlp.
    pub cookies: HashMap<String, String>,
    /// yt-dlp format selector for audio; low bitrates are enough for recognition.
    pub audio_format: String,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            cookies: HashMap::new(),
            audio_format: "worstaudio/bestaudio[abr<=32]/bestaudio[abr<=64]/bestaudio".to_string(),
        }
    }
}

/// Speech recognition settings (OpenAI-compatible transcription API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// API base URL; the OpenAI default when unset.
    pub api_base: Option<String>,
    /// Transcription model.
    pub model: String,
    /// Spoken-language hint (ISO-639-1).
    pub language: Option<String>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
        }
    }
}

/// Translation settings (OpenAI-compatible chat completion API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    /// Chat model used for translation.
    pub model: String,
    /// Default target language when a request does not name one.
    pub target_language: String,
    /// Platforms whose native language is already the desired output.
    pub skip_platforms: Vec<String>,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: Some("https://api.deepseek.com".to_string()),
            model: "deepseek-chat".to_string(),
            target_language: "zh".to_string(),
            skip_platforms: vec!["bilibili".to_string()],
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    /// Streaming synthesis endpoint.
    pub endpoint: String,
    pub app_id: String,
    pub access_key: String,
    /// Catalog voice used when a request does not name one.
    pub default_speaker: String,
    /// Resource profile for catalog voices.
    pub default_resource: String,
    /// Resource profile for personalized (cloned) voices.
    pub cloned_voice_resource: String,
    /// Maximum characters kept in the history preview.
    pub preview_chars: usize,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://openspeech.bytedance.com/api/v3/tts/unidirectional".to_string(),
            app_id: String::new(),
            access_key: String::new(),
            default_speaker: "zh_female_shuangkuaisisi_moon_bigtts".to_string(),
            default_resource: "volc.service_type.10029".to_string(),
            cloned_voice_resource: "volc.megatts.default".to_string(),
            preview_chars: 200,
        }
    }
}

/// Which text length the ASR quota is charged for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AsrBilling {
    /// Length of the text delivered to the user (translated when translation ran).
    #[default]
    Delivered,
    /// Length of the raw recognized text.
    Recognized,
}

impl std::str::FromStr for AsrBilling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delivered" => Ok(AsrBilling::Delivered),
            "recognized" => Ok(AsrBilling::Recognized),
            _ => Err(format!("Unknown ASR billing basis: {}", s)),
        }
    }
}

/// Quota and package settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    pub asr_billing: AsrBilling,
    /// Package name used by administrative seeding.
    pub seed_package: String,
    /// Validity of seeded grants in days.
    pub seed_days: i64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            asr_billing: AsrBilling::Delivered,
            seed_package: "beta_seed".to_string(),
            seed_days: 30,
        }
    }
}

/// Per-stage caps for external calls, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub resolve_secs: u64,
    pub audio_secs: u64,
    pub recognize_secs: u64,
    pub translate_secs: u64,
    pub synthesize_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            resolve_secs: 120,
            audio_secs: 900,
            recognize_secs: 600,
            translate_secs: 180,
            synthesize_secs: 180,
        }
    }
}

impl TimeoutSettings {
    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve_secs)
    }

    pub fn audio(&self) -> Duration {
        Duration::from_secs(self.audio_secs)
    }

    pub fn recognize(&self) -> Duration {
        Duration::from_secs(self.recognize_secs)
    }

    pub fn translate(&self) -> Duration {
        Duration::from_secs(self.translate_secs)
    }

    pub fn synthesize(&self) -> Duration {
        Duration::from_secs(self.synthesize_secs)
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TransvoxError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("transvox")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.database.sqlite_path)
    }

    /// Get the expanded bucket root.
    pub fn storage_root(&self) -> PathBuf {
        Self::expand_path(&self.storage.root)
    }

    /// Get the expanded checkpoint directory.
    pub fn checkpoint_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.checkpoint_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [translation]
            target_language = "en"

            [quota]
            asr_billing = "recognized"
            "#,
        )
        .unwrap();

        assert_eq!(settings.translation.target_language, "en");
        assert_eq!(settings.translation.skip_platforms, vec!["bilibili".to_string()]);
        assert_eq!(settings.quota.asr_billing, AsrBilling::Recognized);
        assert_eq!(settings.quota.seed_days, 30);
        assert_eq!(settings.tts.preview_chars, 200);
    }

    #[test]
    fn test_asr_billing_from_str() {
        assert_eq!("Delivered".parse::<AsrBilling>().unwrap(), AsrBilling::Delivered);
        assert!("bytes".parse::<AsrBilling>().is_err());
    }
}
