//! Chat-completion translator.

use super::Translator;
use crate::config::TranslationSettings;
use crate::error::{Result, TransvoxError};
use crate::openai::{create_client, DEFAULT_TIMEOUT_SECS};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Translator backed by an OpenAI-compatible chat model.
pub struct ChatTranslator {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl ChatTranslator {
    pub fn new(settings: &TranslationSettings) -> Result<Self> {
        let client = create_client(
            settings.api_key.as_deref(),
            settings.api_base.as_deref(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )?;

        Ok(Self {
            client,
            model: settings.model.clone(),
        })
    }
}

/// Human-readable name for common language codes; other values pass through.
pub(crate) fn language_name(code: &str) -> &str {
    match code.to_lowercase().as_str() {
        "zh" | "zh-cn" | "zh-hans" => "Simplified Chinese",
        "zh-tw" | "zh-hant" => "Traditional Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        _ => code,
    }
}

fn system_prompt(target_language: &str) -> String {
    format!(
        "You are a professional subtitle translator. Translate the user's transcript into {}. \
         Keep the meaning and tone, do not summarize, and output only the translation.",
        language_name(target_language)
    )
}

#[async_trait]
impl Translator for ChatTranslator {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let bad_request = |e: async_openai::error::OpenAIError| {
            TransvoxError::UpstreamTranslateFailed(format!("bad request: {}", e))
        };

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(target_language))
                .build()
                .map_err(bad_request)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(text.to_string())
                .build()
                .map_err(bad_request)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.3)
            .build()
            .map_err(bad_request)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| TransvoxError::UpstreamTranslateFailed(e.to_string()))?;

        let translated = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TransvoxError::UpstreamTranslateFailed("empty translation".into()))?
            .to_string();

        debug!(chars = translated.chars().count(), "Translated");
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("zh"), "Simplified Chinese");
        assert_eq!(language_name("EN"), "English");
        assert_eq!(language_name("pt-br"), "pt-br");
    }

    #[test]
    fn test_system_prompt_names_target() {
        assert!(system_prompt("ja").contains("Japanese"));
    }
}
