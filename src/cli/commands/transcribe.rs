//! Transcribe command implementation.

use super::{call_context, spawn_upload_bars};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::media_source::Platform;
use crate::orchestrator::{Orchestrator, TranscribeRequest};
use anyhow::Result;
use indicatif::MultiProgress;

/// Run the transcribe command.
pub async fn run_transcribe(
    input: &str,
    user: &str,
    lang: Option<String>,
    json: bool,
    timeout: Option<u64>,
    settings: Settings,
) -> Result<()> {
    let platform = Platform::detect(input);
    let translate = !settings
        .translation
        .skip_platforms
        .iter()
        .any(|p| p.eq_ignore_ascii_case(platform.as_str()));

    // Pre-flight checks
    if let Err(e) = preflight::check(Operation::Transcribe { translate }, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'transvox doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let multi = MultiProgress::new();
    let (progress_tx, progress_task) = spawn_upload_bars(multi.clone());
    let orchestrator = Orchestrator::new(settings)?.with_upload_progress(progress_tx);

    let request = TranscribeRequest {
        identity: user.to_string(),
        reference: input.to_string(),
        target_language: lang,
    };

    let spinner = multi.add(Output::spinner("Transcribing..."));
    let result = orchestrator.transcribe(&call_context(timeout), &request).await;
    spinner.finish_and_clear();

    drop(orchestrator);
    let _ = progress_task.await;

    let outcome = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    Output::header("Video");
    Output::video_info(&outcome.video);

    Output::header("Original");
    println!("{}", outcome.original_text);

    if outcome.translated {
        Output::header(&format!("Translation ({})", outcome.language));
        println!("{}", outcome.translated_text);
    }

    println!();
    Output::kv("Recognized", &format!("{} chars", outcome.asr_char_count));
    if outcome.translated {
        Output::kv("Translated", &format!("{} chars", outcome.translate_char_count));
    }
    if outcome.cached {
        Output::kv("Source", "stored transcript");
    }
    if !user.is_empty() {
        Output::kv("Billed", &format!("{} chars", outcome.billed_chars));
    }
    Output::success("Done.");

    Ok(())
}
