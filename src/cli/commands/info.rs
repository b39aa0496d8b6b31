//! Info and transcript commands.

use super::call_context;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Resolve a video and print its details.
pub async fn run_info(input: &str, json: bool, timeout: Option<u64>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Resolve, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'transvox doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;

    let spinner = Output::spinner("Resolving video...");
    let result = orchestrator.resolve_video(&call_context(timeout), input).await;
    spinner.finish_and_clear();
    let video = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&video)?);
    } else {
        Output::header("Video");
        Output::video_info(&video);
        if !video.description.is_empty() {
            println!();
            println!("{}", video.description);
        }
    }

    Ok(())
}

/// Print a stored transcript.
pub fn run_transcript(input: &str, lang: Option<String>, settings: Settings) -> Result<()> {
    let language = lang.unwrap_or_else(|| settings.translation.target_language.clone());
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.transcript(input, &language)? {
        Some(transcript) => {
            Output::header("Original");
            println!("{}", transcript.original_text);
            if transcript.translated_text != transcript.original_text {
                Output::header(&format!("Translation ({})", transcript.language));
                println!("{}", transcript.translated_text);
            }
            println!();
            Output::kv("Recognized", &format!("{} chars", transcript.asr_char_count));
            Output::kv("Translated", &format!("{} chars", transcript.translate_char_count));
        }
        None => {
            Output::warning(&format!("No {} transcript stored for {}.", language, input));
            Output::info("Run 'transvox transcribe' first.");
        }
    }

    Ok(())
}
