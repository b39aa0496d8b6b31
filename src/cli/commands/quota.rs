//! Quota administration commands: seed, grant, balance, usage.

use crate::cli::Output;
use crate::config::Settings;
use crate::db::Database;
use crate::ledger::QuotaLedger;
use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use std::sync::Arc;

fn open_ledger(settings: &Settings) -> Result<QuotaLedger> {
    let db = Arc::new(Database::open(&settings.sqlite_path())?);
    Ok(QuotaLedger::new(
        db,
        settings.quota.seed_package.clone(),
        settings.quota.seed_days,
    ))
}

/// Issue the seed package to `identities`.
pub fn run_seed(identities: &[String], asr: i64, tts: i64, settings: Settings) -> Result<()> {
    let ledger = open_ledger(&settings)?;
    let written = ledger.seed_grants(identities, asr, tts)?;

    Output::success(&format!(
        "Seeded {} identit{} with {} ({} ASR / {} TTS chars, {} days).",
        written,
        if written == 1 { "y" } else { "ies" },
        settings.quota.seed_package,
        asr,
        tts,
        settings.quota.seed_days
    ));
    Ok(())
}

/// Add a top-up grant.
pub fn run_grant(
    identity: &str,
    package: &str,
    asr: i64,
    tts: i64,
    days: Option<i64>,
    settings: Settings,
) -> Result<()> {
    if identity.trim().is_empty() {
        anyhow::bail!("An identity is required");
    }
    if asr <= 0 && tts <= 0 {
        anyhow::bail!("Grant at least one of --asr or --tts");
    }

    let ledger = open_ledger(&settings)?;
    let grant_id = ledger.grant(identity, package, asr, tts, days)?;

    Output::success(&format!(
        "Granted {} to {} (grant #{}, expires {}).",
        package,
        identity,
        grant_id,
        match days {
            Some(d) => format!("in {} days", d),
            None => "never".to_string(),
        }
    ));
    Ok(())
}

/// Print live grants with remaining balances.
pub fn run_balance(identity: &str, settings: Settings) -> Result<()> {
    let ledger = open_ledger(&settings)?;
    let grants = ledger.balances(identity)?;

    if grants.is_empty() {
        Output::info(&format!("No active grants for {}.", identity));
        return Ok(());
    }

    Output::header(&format!("Balance for {}", identity));
    let (mut asr_total, mut tts_total) = (0, 0);
    for grant in &grants {
        println!(
            "  {} {} #{} (expires {})",
            style("*").cyan(),
            style(&grant.package_name).bold(),
            grant.grant_id,
            format_expiry(grant.expire_at)
        );
        Output::kv(
            "ASR",
            &format!("{} / {} left ({} used)", grant.asr_remaining, grant.asr_quota, grant.asr_used),
        );
        Output::kv(
            "TTS",
            &format!("{} / {} left ({} used)", grant.tts_remaining, grant.tts_quota, grant.tts_used),
        );
        asr_total += grant.asr_remaining;
        tts_total += grant.tts_remaining;
    }

    println!();
    Output::info(&format!("Total: {} ASR chars, {} TTS chars.", asr_total, tts_total));
    Ok(())
}

/// Print daily usage counters.
pub fn run_usage(identity: &str, days: u32, settings: Settings) -> Result<()> {
    let ledger = open_ledger(&settings)?;
    let rows = ledger.usage(identity, days)?;

    if rows.is_empty() {
        Output::info("No usage recorded.");
        return Ok(());
    }

    Output::header(&format!("Usage for {}", rows[0].user_identity));
    println!(
        "  {:<12} {:>10} {:>10} {:>10} {:>9}",
        style("date").dim(),
        style("asr").dim(),
        style("translate").dim(),
        style("tts").dim(),
        style("requests").dim()
    );
    for row in &rows {
        println!(
            "  {:<12} {:>10} {:>10} {:>10} {:>9}",
            row.date, row.asr_chars, row.translate_chars, row.tts_chars, row.requests
        );
    }
    Ok(())
}

fn format_expiry(expire_at: Option<DateTime<Utc>>) -> String {
    match expire_at {
        Some(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry(None), "never");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(format_expiry(Some(at)), "2026-03-01 08:30 UTC");
    }
}
