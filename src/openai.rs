//! OpenAI-compatible client construction.

use crate::error::{Result, TransvoxError};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create a client for an OpenAI-compatible endpoint.
///
/// `api_key` falls back to `OPENAI_API_KEY`; `api_base` to the OpenAI default.
pub fn create_client(
    api_key: Option<&str>,
    api_base: Option<&str>,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransvoxError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let mut config = OpenAIConfig::default();
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        config = config.with_api_key(key);
    }
    if let Some(base) = api_base.filter(|b| !b.is_empty()) {
        config = config.with_api_base(base.trim_end_matches('/'));
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}
