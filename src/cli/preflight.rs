//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and credentials are available before
//! starting operations that would otherwise fail midway, after quota
//! bookkeeping has already begun.

use crate::config::Settings;
use crate::error::{Result, TransvoxError};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Resolving metadata requires yt-dlp.
    Resolve,
    /// Transcription requires yt-dlp and recognition credentials; translation
    /// credentials only when the text will be translated.
    Transcribe { translate: bool },
    /// Synthesis requires the speech service credentials.
    Synthesize,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Resolve => {
            check_tool(&settings.media.ytdlp_path)?;
        }
        Operation::Transcribe { translate } => {
            check_api_key("recognition", settings.recognition.api_key.as_deref())?;
            if translate {
                check_api_key("translation", settings.translation.api_key.as_deref())?;
            }
            check_tool(&settings.media.ytdlp_path)?;
        }
        Operation::Synthesize => {
            check_tts_credentials(settings)?;
        }
    }
    Ok(())
}

/// The configured key, falling back to `OPENAI_API_KEY`.
pub fn resolve_api_key(configured: Option<&str>) -> Option<String> {
    configured
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
}

fn check_api_key(section: &str, configured: Option<&str>) -> Result<()> {
    match resolve_api_key(configured) {
        Some(_) => Ok(()),
        None => Err(TransvoxError::Config(format!(
            "No {section} API key. Set {section}.api_key in the config file or export OPENAI_API_KEY='sk-...'"
        ))),
    }
}

fn check_tts_credentials(settings: &Settings) -> Result<()> {
    if settings.tts.app_id.is_empty() || settings.tts.access_key.is_empty() {
        return Err(TransvoxError::Config(
            "Speech synthesis credentials missing. Set tts.app_id and tts.access_key".to_string(),
        ));
    }
    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg("--version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(TransvoxError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TransvoxError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(TransvoxError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_requires_credentials() {
        let mut settings = Settings::default();
        assert!(matches!(
            check(Operation::Synthesize, &settings),
            Err(TransvoxError::Config(_))
        ));

        settings.tts.app_id = "app".into();
        settings.tts.access_key = "secret".into();
        assert!(check(Operation::Synthesize, &settings).is_ok());
    }

    #[test]
    fn test_configured_key_wins() {
        assert_eq!(resolve_api_key(Some("sk-config")), Some("sk-config".to_string()));
        assert!(check_api_key("recognition", Some("sk-config")).is_ok());
    }

    #[test]
    fn test_missing_tool() {
        let mut settings = Settings::default();
        settings.media.ytdlp_path = "/nonexistent/yt-dlp-for-tests".into();
        assert!(matches!(
            check(Operation::Resolve, &settings),
            Err(TransvoxError::ToolNotFound(_))
        ));
    }
}
