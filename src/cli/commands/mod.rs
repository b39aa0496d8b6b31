//! CLI command implementations.

mod config;
mod doctor;
mod history;
mod info;
mod quota;
mod synthesize;
mod transcribe;
mod voice;

pub use config::run_config;
pub use doctor::run_doctor;
pub use history::run_history;
pub use info::{run_info, run_transcript};
pub use quota::{run_balance, run_grant, run_seed, run_usage};
pub use synthesize::run_synthesize;
pub use transcribe::run_transcribe;
pub use voice::run_voice;

use crate::cli::Output;
use crate::context::CallContext;
use crate::storage::UploadProgress;
use indicatif::{MultiProgress, ProgressBar};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Request context for the global `--timeout` flag.
fn call_context(timeout: Option<u64>) -> CallContext {
    match timeout {
        Some(secs) => CallContext::with_timeout(Duration::from_secs(secs)),
        None => CallContext::background(),
    }
}

/// Draw one progress bar per uploaded object until every sender is dropped.
fn spawn_upload_bars(multi: MultiProgress) -> (mpsc::Sender<UploadProgress>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<UploadProgress>(32);

    let handle = tokio::spawn(async move {
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        while let Some(event) = rx.recv().await {
            let bar = bars.entry(event.key.clone()).or_insert_with(|| {
                multi.add(Output::upload_bar(event.total, &format!("Uploading {}", event.key)))
            });
            if let Some(total) = event.total {
                bar.set_length(total);
            }
            bar.set_position(event.transferred);
            if event.total == Some(event.transferred) {
                bar.finish_and_clear();
            }
        }
        for bar in bars.values() {
            bar.finish_and_clear();
        }
    });

    (tx, handle)
}
