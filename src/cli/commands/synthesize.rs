//! Synthesize command implementation.

use super::{call_context, spawn_upload_bars};
use crate::cli::output::content_preview;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::{Orchestrator, SynthesizeRequest};
use anyhow::Result;
use indicatif::MultiProgress;

/// Run the synthesize command.
pub async fn run_synthesize(
    text: &str,
    user: &str,
    voice: Option<String>,
    personalized: bool,
    json: bool,
    timeout: Option<u64>,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Synthesize, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'transvox doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let multi = MultiProgress::new();
    let (progress_tx, progress_task) = spawn_upload_bars(multi.clone());
    let orchestrator = Orchestrator::new(settings)?.with_upload_progress(progress_tx);

    let request = SynthesizeRequest {
        identity: user.to_string(),
        text: text.to_string(),
        voice,
        personalized,
    };

    let spinner = multi.add(Output::spinner("Synthesizing..."));
    let result = orchestrator.synthesize(&call_context(timeout), &request).await;
    spinner.finish_and_clear();

    drop(orchestrator);
    let _ = progress_task.await;

    let outcome = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if outcome.cached {
        Output::info("Served from cache.");
    }
    Output::kv("Voice", &outcome.voice);
    Output::kv("Characters", &outcome.char_count.to_string());
    Output::kv("Request", &outcome.request_id);
    // Inline data URLs are long; --json prints them in full
    Output::kv("Audio", &content_preview(&outcome.audio_url, 120));
    Output::success("Done.");

    Ok(())
}
