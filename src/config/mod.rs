//! Configuration module for Transvox.
//!
//! Handles loading and managing application settings. Credentials are read
//! once here and handed to each collaborator's constructor.

mod settings;

pub use settings::{
    AsrBilling, DatabaseSettings, GeneralSettings, MediaSettings, QuotaSettings,
    RecognitionSettings, Settings, StorageSettings, TimeoutSettings, TranslationSettings,
    TtsSettings,
};
