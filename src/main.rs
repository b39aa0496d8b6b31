//! Transvox CLI entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transvox::cli::{commands, Cli, Commands, Output};
use transvox::config::Settings;
use transvox::error::{ErrorKind, TransvoxError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("transvox={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config_path = cli
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    let timeout = cli.timeout;

    // Execute command
    match &cli.command {
        Commands::Doctor => {
            commands::run_doctor(&settings, &config_path)?;
        }

        Commands::Info { input, json } => {
            commands::run_info(input, *json, timeout, settings).await?;
        }

        Commands::Transcribe { input, user, lang, json } => {
            commands::run_transcribe(input, user, lang.clone(), *json, timeout, settings).await?;
        }

        Commands::Transcript { input, lang } => {
            commands::run_transcript(input, lang.clone(), settings)?;
        }

        Commands::Synthesize {
            text,
            user,
            voice,
            my_voice,
            json,
        } => {
            commands::run_synthesize(text, user, voice.clone(), *my_voice, *json, timeout, settings)
                .await?;
        }

        Commands::Seed { identities, asr, tts } => {
            commands::run_seed(identities, *asr, *tts, settings)?;
        }

        Commands::Grant {
            identity,
            package,
            asr,
            tts,
            days,
        } => {
            commands::run_grant(identity, package, *asr, *tts, *days, settings)?;
        }

        Commands::Balance { identity } => {
            commands::run_balance(identity, settings)?;
        }

        Commands::Usage { identity, days } => {
            commands::run_usage(identity, *days, settings)?;
        }

        Commands::History { identity, page, size } => {
            commands::run_history(identity, *page, *size, settings)?;
        }

        Commands::Voice { action } => {
            commands::run_voice(action, settings)?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, &config_path)?;
        }
    }

    Ok(())
}

/// Pipeline failures are shown as their caller-facing kind; upstream detail
/// stays in the debug log.
fn report(error: &anyhow::Error) {
    match error.downcast_ref::<TransvoxError>() {
        Some(e) if e.kind() != ErrorKind::Internal => {
            tracing::debug!("{}", e);
            Output::error(&e.kind().to_string());
        }
        _ => Output::error(&format!("{:#}", error)),
    }
}
