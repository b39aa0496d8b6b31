//! Voice command implementation.

use crate::cli::{Output, VoiceAction};
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the voice command.
pub fn run_voice(action: &VoiceAction, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match action {
        VoiceAction::Set { identity, voice_id } => {
            orchestrator.register_voice(identity, voice_id)?;
            Output::success(&format!("Registered voice {} for {}.", voice_id.trim(), identity));
        }

        VoiceAction::Show { identity } => match orchestrator.voice_of(identity)? {
            Some(voice) => {
                Output::kv("Voice", &voice);
                Output::kv("Resource", &orchestrator.settings().tts.cloned_voice_resource);
            }
            None => Output::warning(&format!("No personalized voice registered for {}.", identity)),
        },
    }

    Ok(())
}
