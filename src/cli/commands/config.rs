//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Run the config command against the file at `config_path`.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            let updated = set_value(&settings, key, value)?;
            updated.save_to(&config_path.to_path_buf())?;
            Output::success(&format!("Set {} = {}", key, value));
        }

        ConfigAction::Edit => {
            // Create default config if it doesn't exist
            if !config_path.exists() {
                settings.save_to(&config_path.to_path_buf())?;
                Output::info(&format!("Created default config at {:?}", config_path));
            }

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            let status = std::process::Command::new(&editor).arg(config_path).status();

            match status {
                Ok(s) if s.success() => {
                    Output::success("Config saved.");
                }
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {:?}", config_path));
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// Apply `key = value` (dotted key, TOML literal or bare string) to a copy of `settings`.
fn set_value(settings: &Settings, key: &str, value: &str) -> Result<Settings> {
    let mut root = toml::Value::try_from(settings).context("Failed to serialize config")?;

    let (section, leaf) = key
        .rsplit_once('.')
        .ok_or_else(|| anyhow!("Expected a dotted key such as translation.target_language"))?;

    let mut table = &mut root;
    for part in section.split('.') {
        table = table
            .get_mut(part)
            .filter(|v| v.is_table())
            .ok_or_else(|| anyhow!("Unknown configuration section: {}", section))?;
    }
    let table = table
        .as_table_mut()
        .ok_or_else(|| anyhow!("Unknown configuration section: {}", section))?;
    table.insert(leaf.to_string(), parse_value(value));

    let updated: Settings = root
        .try_into()
        .with_context(|| format!("Invalid value for {}", key))?;

    // Unknown fields are dropped on deserialization; make sure the key stuck
    let check = toml::Value::try_from(&updated).context("Failed to serialize config")?;
    let mut node = Some(&check);
    for part in key.split('.') {
        node = node.and_then(|n| n.get(part));
    }
    if node.is_none() {
        return Err(anyhow!("Unknown configuration key: {}", key));
    }

    Ok(updated)
}

/// Parse a TOML literal, falling back to a plain string.
fn parse_value(value: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AsrBilling;

    #[test]
    fn test_set_string_and_number() {
        let settings = Settings::default();

        let updated = set_value(&settings, "translation.target_language", "en").unwrap();
        assert_eq!(updated.translation.target_language, "en");

        let updated = set_value(&updated, "quota.seed_days", "14").unwrap();
        assert_eq!(updated.quota.seed_days, 14);
        assert_eq!(updated.translation.target_language, "en");
    }

    #[test]
    fn test_set_enum_and_optional() {
        let settings = Settings::default();

        let updated = set_value(&settings, "quota.asr_billing", "recognized").unwrap();
        assert_eq!(updated.quota.asr_billing, AsrBilling::Recognized);

        // Unset optionals are absent from the serialized form but still settable
        let updated = set_value(&updated, "recognition.api_key", "sk-test").unwrap();
        assert_eq!(updated.recognition.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_set_rejects_unknown_keys() {
        let settings = Settings::default();
        assert!(set_value(&settings, "translation.target_lang", "en").is_err());
        assert!(set_value(&settings, "nosuch.key", "1").is_err());
        assert!(set_value(&settings, "quota", "1").is_err());
        assert!(set_value(&settings, "quota.seed_days", "\"many\"").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("zh"), toml::Value::String("zh".into()));
        assert!(parse_value("[\"youtube\"]").is_array());
    }
}
