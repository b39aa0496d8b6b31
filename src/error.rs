//! Error types for Transvox.

use thiserror::Error;

/// Library-level error type for Transvox operations.
#[derive(Error, Debug)]
pub enum TransvoxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Video metadata resolution failed: {0}")]
    UpstreamResolveFailed(String),

    #[error("Audio acquisition failed: {0}")]
    UpstreamAudioFailed(String),

    #[error("Speech recognition failed: {0}")]
    UpstreamRecognizeFailed(String),

    #[error("Translation failed: {0}")]
    UpstreamTranslateFailed(String),

    #[error("Speech synthesis failed: {0}")]
    UpstreamSynthesizeFailed(String),

    #[error("Insufficient {kind} balance: need {need} characters")]
    QuotaInsufficient { kind: String, need: i64 },

    #[error("No personalized voice registered for identity")]
    VoiceNotConfigured,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Invalid audio reference: {0}")]
    InvalidAudioReference(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The small, fixed set of error kinds reported to callers.
///
/// Upstream error text never crosses this boundary; only the code and the
/// canned message do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UpstreamResolveFailed,
    UpstreamAudioFailed,
    UpstreamRecognizeFailed,
    UpstreamTranslateFailed,
    UpstreamSynthesizeFailed,
    QuotaInsufficient,
    VoiceNotConfigured,
    UploadFailed,
    InvalidAudioReference,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// Stable numeric code for API consumers.
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::UpstreamResolveFailed | ErrorKind::UpstreamAudioFailed => 20020,
            ErrorKind::UpstreamRecognizeFailed | ErrorKind::InvalidAudioReference => 20021,
            ErrorKind::UpstreamTranslateFailed => 20022,
            ErrorKind::UpstreamSynthesizeFailed => 20023,
            ErrorKind::QuotaInsufficient => 20024,
            ErrorKind::UploadFailed => 20025,
            ErrorKind::VoiceNotConfigured => 20030,
            ErrorKind::InvalidInput => 10001,
            ErrorKind::Internal => 10000,
        }
    }

    /// User-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::UpstreamResolveFailed => "video service error",
            ErrorKind::UpstreamAudioFailed => "audio service error",
            ErrorKind::UpstreamRecognizeFailed => "speech recognition service error",
            ErrorKind::UpstreamTranslateFailed => "translation service error",
            ErrorKind::UpstreamSynthesizeFailed => "speech synthesis service error",
            ErrorKind::QuotaInsufficient => "insufficient character balance",
            ErrorKind::VoiceNotConfigured => "personal voice is not configured",
            ErrorKind::UploadFailed => "storage upload failed",
            ErrorKind::InvalidAudioReference => "invalid audio reference",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl TransvoxError {
    /// Map this error to the caller-visible kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransvoxError::UpstreamResolveFailed(_) => ErrorKind::UpstreamResolveFailed,
            TransvoxError::UpstreamAudioFailed(_) => ErrorKind::UpstreamAudioFailed,
            TransvoxError::UpstreamRecognizeFailed(_) => ErrorKind::UpstreamRecognizeFailed,
            TransvoxError::UpstreamTranslateFailed(_) => ErrorKind::UpstreamTranslateFailed,
            TransvoxError::UpstreamSynthesizeFailed(_) => ErrorKind::UpstreamSynthesizeFailed,
            TransvoxError::QuotaInsufficient { .. } => ErrorKind::QuotaInsufficient,
            TransvoxError::VoiceNotConfigured => ErrorKind::VoiceNotConfigured,
            TransvoxError::UploadFailed(_) => ErrorKind::UploadFailed,
            TransvoxError::InvalidAudioReference(_) => ErrorKind::InvalidAudioReference,
            TransvoxError::InvalidInput(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

/// Result type alias for Transvox operations.
pub type Result<T> = std::result::Result<T, TransvoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_hides_upstream_text() {
        let err = TransvoxError::UpstreamRecognizeFailed("volc said: token abc123 expired".into());
        let kind = err.kind();
        assert_eq!(kind, ErrorKind::UpstreamRecognizeFailed);
        assert!(!kind.to_string().contains("abc123"));
    }

    #[test]
    fn test_plumbing_errors_are_internal() {
        let err = TransvoxError::ToolFailed("yt-dlp exited 1".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.kind().code(), 10000);
    }
}
