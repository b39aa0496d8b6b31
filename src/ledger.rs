//! Quota ledger.
//!
//! Consumable balances live on package grants; reporting counters live in the
//! daily usage table. Empty identities are the anonymous guest: metered, never
//! gated, never charged.

use crate::db::{Database, GrantView, UsageDailyRecord, UsageDelta};
use crate::effects::BestEffort;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub use crate::db::QuotaKind;

/// Identity under which anonymous usage is recorded.
pub const GUEST_IDENTITY: &str = "guest";

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of a deduction. Running out of balance is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deduction {
    Applied { grant_id: i64 },
    NoBalance,
    Skipped,
}

/// Character-balance ledger over the persistent store.
pub struct QuotaLedger {
    db: Arc<Database>,
    seed_package: String,
    seed_days: i64,
}

impl QuotaLedger {
    pub fn new(db: Arc<Database>, seed_package: impl Into<String>, seed_days: i64) -> Self {
        Self {
            db,
            seed_package: seed_package.into(),
            seed_days,
        }
    }

    /// Whether the unexpired grants of `identity` cover `need` characters.
    #[instrument(skip(self))]
    pub fn check_balance(&self, identity: &str, kind: QuotaKind, need: i64) -> Result<bool> {
        if identity.is_empty() || need <= 0 {
            return Ok(true);
        }
        let available = self.db.sum_remaining(identity, kind, now_unix())?;
        debug!(available, "Balance check");
        Ok(available >= need)
    }

    /// Subtract `amount` from the earliest-expiring grant with balance left,
    /// clamping at zero.
    #[instrument(skip(self))]
    pub fn deduct(&self, identity: &str, kind: QuotaKind, amount: i64) -> Result<Deduction> {
        if identity.is_empty() || amount <= 0 {
            return Ok(Deduction::Skipped);
        }
        match self.db.deduct_earliest(identity, kind, amount, now_unix())? {
            Some(grant_id) => Ok(Deduction::Applied { grant_id }),
            None => {
                info!("No grant with remaining {} balance; continuing", kind);
                Ok(Deduction::NoBalance)
            }
        }
    }

    /// Add `delta` to today's usage counters. Failures are logged only.
    pub fn record_usage(&self, identity: &str, delta: UsageDelta) {
        self.try_record_usage(identity, delta)
            .best_effort("record_usage");
    }

    /// Fallible form of [`record_usage`](Self::record_usage).
    pub fn try_record_usage(&self, identity: &str, delta: UsageDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        self.db.add_usage(usage_identity(identity), &today(), &delta)
    }

    /// Batch-issue the seed package to `identities`, replacing any earlier
    /// seed grant. Returns the number of grants written.
    #[instrument(skip(self, identities))]
    pub fn seed_grants(&self, identities: &[String], asr_chars: i64, tts_chars: i64) -> Result<usize> {
        let expire_at = now_unix() + self.seed_days * SECONDS_PER_DAY;
        self.db.seed_grants(
            identities,
            &self.seed_package,
            asr_chars.max(0),
            tts_chars.max(0),
            Some(expire_at),
        )
    }

    /// Add a top-up grant under `package`. `days = None` never expires.
    pub fn grant(
        &self,
        identity: &str,
        package: &str,
        asr_chars: i64,
        tts_chars: i64,
        days: Option<i64>,
    ) -> Result<i64> {
        let package_id = self.db.upsert_package(package, asr_chars.max(0), tts_chars.max(0))?;
        let expire_at = days.map(|d| now_unix() + d * SECONDS_PER_DAY);
        self.db
            .insert_grant(identity, package_id, asr_chars.max(0), tts_chars.max(0), expire_at)
    }

    /// Live grants of `identity` with used/remaining per kind.
    pub fn balances(&self, identity: &str) -> Result<Vec<GrantView>> {
        if identity.is_empty() {
            return Ok(Vec::new());
        }
        self.db.list_grants(identity, now_unix())
    }

    /// The last `days` usage rows, newest first.
    pub fn usage(&self, identity: &str, days: u32) -> Result<Vec<UsageDailyRecord>> {
        self.db.list_usage(usage_identity(identity), days.max(1) as i64)
    }
}

fn usage_identity(identity: &str) -> &str {
    if identity.is_empty() {
        GUEST_IDENTITY
    } else {
        identity
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(Arc::new(Database::in_memory().unwrap()), "beta_seed", 30)
    }

    #[test]
    fn test_guest_is_never_gated() {
        let ledger = ledger();
        assert!(ledger.check_balance("", QuotaKind::Tts, 1_000_000).unwrap());
        assert_eq!(ledger.deduct("", QuotaKind::Tts, 10).unwrap(), Deduction::Skipped);

        ledger.record_usage("", UsageDelta::tts(10));
        let rows = ledger.usage("", 7).unwrap();
        assert_eq!(rows[0].user_identity, GUEST_IDENTITY);
        assert_eq!(rows[0].tts_chars, 10);
    }

    #[test]
    fn test_check_balance_sums_grants() {
        let ledger = ledger();
        ledger.grant("u1", "topup", 0, 30, Some(1)).unwrap();
        ledger.grant("u1", "topup", 0, 20, None).unwrap();

        assert!(ledger.check_balance("u1", QuotaKind::Tts, 50).unwrap());
        assert!(!ledger.check_balance("u1", QuotaKind::Tts, 51).unwrap());
        assert!(!ledger.check_balance("u1", QuotaKind::Asr, 1).unwrap());
    }

    #[test]
    fn test_overdraft_is_a_no_op_and_usage_still_recorded() {
        let ledger = ledger();
        let grant = ledger.grant("u1", "topup", 0, 5, Some(1)).unwrap();

        assert_eq!(
            ledger.deduct("u1", QuotaKind::Tts, 8).unwrap(),
            Deduction::Applied { grant_id: grant }
        );
        assert_eq!(ledger.deduct("u1", QuotaKind::Tts, 8).unwrap(), Deduction::NoBalance);
        ledger.record_usage("u1", UsageDelta::tts(8));

        let views = ledger.balances("u1").unwrap();
        assert_eq!(views[0].tts_remaining, 0);
        assert_eq!(views[0].tts_used, 5);
        assert_eq!(ledger.usage("u1", 1).unwrap()[0].tts_chars, 8);
    }

    #[test]
    fn test_balance_never_negative_over_many_deductions() {
        let ledger = ledger();
        ledger.grant("u1", "a", 100, 0, Some(1)).unwrap();
        ledger.grant("u1", "b", 37, 0, Some(3)).unwrap();

        for amount in [13, 90, 1, 250, 7, 7, 7] {
            ledger.deduct("u1", QuotaKind::Asr, amount).unwrap();
            for view in ledger.balances("u1").unwrap() {
                assert!(view.asr_remaining >= 0);
            }
        }
    }

    #[test]
    fn test_seed_grants_expire_in_configured_days() {
        let ledger = ledger();
        let n = ledger
            .seed_grants(&["alice".to_string(), "bob".to_string()], 1000, 1000)
            .unwrap();
        assert_eq!(n, 2);

        let view = &ledger.balances("bob").unwrap()[0];
        let expires = view.expire_at.unwrap();
        let days = (expires - chrono::Utc::now()).num_days();
        assert!((29..=30).contains(&days));
    }
}
