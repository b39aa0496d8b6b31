//! Doctor command - verify system requirements and configuration.

use crate::cli::preflight::resolve_api_key;
use crate::cli::Output;
use crate::config::Settings;
use console::style;
use std::path::Path;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Transvox Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    // Check external tools
    println!("{}", style("External Tools").bold());
    let tool_check = check_tool("yt-dlp", &settings.media.ytdlp_path, install_hint_ytdlp());
    tool_check.print();
    checks.push(tool_check);
    for check in check_cookies(settings) {
        check.print();
        checks.push(check);
    }

    println!();

    // Check credentials
    println!("{}", style("API Configuration").bold());
    let api_checks = vec![
        check_api_key(
            "Recognition API key",
            settings.recognition.api_key.as_deref(),
            "recognition.api_key",
        ),
        check_api_key(
            "Translation API key",
            settings.translation.api_key.as_deref(),
            "translation.api_key",
        ),
        check_tts_credentials(settings),
    ];
    for check in &api_checks {
        check.print();
    }
    checks.extend(api_checks);

    println!();

    // Check directories
    println!("{}", style("Directories").bold());
    let dir_checks = check_directories(settings);
    for check in &dir_checks {
        check.print();
    }
    checks.extend(dir_checks);

    println!();

    // Check configuration
    println!("{}", style("Configuration").bold());
    let config_check = check_config_file(config_path);
    config_check.print();
    checks.push(config_check);

    println!();

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Transvox.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!(
            "All checks passed with {} warning(s).",
            warnings
        ));
    } else {
        Output::success("All checks passed! Transvox is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, program: &str, hint: &str) -> CheckResult {
    match Command::new(program).arg("--version").output() {
        Ok(output) if output.status.success() => {
            // Try to extract version from first line
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            // Truncate long version strings
            let version_display = if version.chars().count() > 50 {
                format!("{}...", version.chars().take(50).collect::<String>())
            } else {
                version
            };

            CheckResult::ok(name, &version_display)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, &format!("{} not found", program), hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Configured cookie files must exist; yt-dlp fails late otherwise.
fn check_cookies(settings: &Settings) -> Vec<CheckResult> {
    let mut platforms: Vec<_> = settings.media.cookies.iter().collect();
    platforms.sort();

    platforms
        .into_iter()
        .filter(|(_, path)| !path.is_empty())
        .map(|(platform, path)| {
            let name = format!("{} cookies", platform);
            let expanded = Settings::expand_path(path);
            if expanded.is_file() {
                CheckResult::ok(&name, &format!("{}", expanded.display()))
            } else {
                CheckResult::warning(
                    &name,
                    &format!("{} (missing)", expanded.display()),
                    "Export cookies in Netscape format or remove the entry",
                )
            }
        })
        .collect()
}

/// Check an OpenAI-compatible API key (config first, then `OPENAI_API_KEY`).
fn check_api_key(name: &str, configured: Option<&str>, config_key: &str) -> CheckResult {
    let hint = format!(
        "Set with: transvox config set {} 'sk-...' (or export OPENAI_API_KEY)",
        config_key
    );
    match resolve_api_key(configured) {
        Some(key) if key.chars().count() > 12 => {
            CheckResult::ok(name, &format!("configured ({})", mask(&key)))
        }
        Some(_) => CheckResult::warning(name, "set but format looks unusual", &hint),
        None => CheckResult::error(name, "not set", &hint),
    }
}

/// Speech synthesis needs an app id and access key.
fn check_tts_credentials(settings: &Settings) -> CheckResult {
    let name = "Speech synthesis";
    match (settings.tts.app_id.is_empty(), settings.tts.access_key.is_empty()) {
        (false, false) => CheckResult::ok(
            name,
            &format!("app {} ({})", settings.tts.app_id, mask(&settings.tts.access_key)),
        ),
        _ => CheckResult::warning(
            name,
            "credentials not set (synthesize will fail)",
            "Set tts.app_id and tts.access_key with: transvox config set",
        ),
    }
}

/// Keep the first and last four characters.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok(
            "Data directory",
            &format!("{}", data_dir.display()),
        ));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let db_path = settings.sqlite_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Database",
            &format!("{} ({})", db_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created on first use",
        ));
    }

    let bucket = settings.storage_root();
    if bucket.exists() {
        results.push(CheckResult::ok(
            "Storage bucket",
            &format!("{} (served at {})", bucket.display(), settings.storage.public_base_url),
        ));
    } else {
        results.push(CheckResult::warning(
            "Storage bucket",
            &format!("{} (will be created)", bucket.display()),
            "Directory will be created on first upload",
        ));
    }

    results
}

/// Check if config file exists.
fn check_config_file(config_path: &Path) -> CheckResult {
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: transvox config edit",
        )
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}
