//! Package grants, daily usage and accounts.

use super::{now_text, Database, GrantView, PackageGrant, QuotaKind, UsageDailyRecord, UsageDelta};
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, instrument};

/// Grant rows are live while `expire_at` is unset or in the future.
const UNEXPIRED: &str = "(expire_at IS NULL OR expire_at > ?2)";

impl Database {
    /// Sum of the remaining `kind` balance across unexpired grants.
    pub fn sum_remaining(&self, identity: &str, kind: QuotaKind, now: i64) -> Result<i64> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COALESCE(SUM({col}), 0) FROM user_package WHERE user_identity = ?1 AND {live}",
            col = kind.remain_column(),
            live = UNEXPIRED,
        );
        let total: i64 = conn.query_row(&sql, params![identity, now], |row| row.get(0))?;
        Ok(total)
    }

    /// Decrement the earliest-expiring live grant with a positive balance.
    ///
    /// Selection and clamped subtraction happen in one statement. Returns the
    /// id of the grant touched, or `None` when no grant had balance left.
    #[instrument(skip(self))]
    pub fn deduct_earliest(
        &self,
        identity: &str,
        kind: QuotaKind,
        amount: i64,
        now: i64,
    ) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let col = kind.remain_column();
        let sql = format!(
            r#"
            UPDATE user_package
            SET {col} = MAX(0, {col} - ?3), updated_at = ?4
            WHERE id = (
                SELECT id FROM user_package
                WHERE user_identity = ?1 AND {live} AND {col} > 0
                ORDER BY expire_at IS NULL, expire_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id
            "#,
            col = col,
            live = UNEXPIRED,
        );

        let grant_id: Option<i64> = conn
            .query_row(&sql, params![identity, now, amount, now_text()], |row| row.get(0))
            .optional()?;
        debug!(?grant_id, "Applied deduction");
        Ok(grant_id)
    }

    /// Additively merge `delta` into the `(identity, date)` usage row.
    pub fn add_usage(&self, identity: &str, date: &str, delta: &UsageDelta) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO usage_daily
            (user_identity, date, asr_chars, translate_chars, tts_chars, requests, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_identity, date) DO UPDATE SET
                asr_chars = asr_chars + excluded.asr_chars,
                translate_chars = translate_chars + excluded.translate_chars,
                tts_chars = tts_chars + excluded.tts_chars,
                requests = requests + excluded.requests
            "#,
            params![
                identity,
                date,
                delta.asr_chars,
                delta.translate_chars,
                delta.tts_chars,
                delta.requests,
                now_text(),
            ],
        )?;
        Ok(())
    }

    /// Most recent usage rows of an identity, newest day first.
    pub fn list_usage(&self, identity: &str, limit: i64) -> Result<Vec<UsageDailyRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT user_identity, date, asr_chars, translate_chars, tts_chars, requests
            FROM usage_daily WHERE user_identity = ?1
            ORDER BY date DESC LIMIT ?2
            "#,
        )?;
        let rows = stmt
            .query_map(params![identity, limit], UsageDailyRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create or refresh a named package template; returns its id.
    pub fn upsert_package(&self, name: &str, asr_chars: i64, tts_chars: i64) -> Result<i64> {
        let conn = self.conn()?;
        let now = now_text();
        let id = conn.query_row(
            r#"
            INSERT INTO package (name, quota_asr_chars, quota_tts_chars, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
                quota_asr_chars = excluded.quota_asr_chars,
                quota_tts_chars = excluded.quota_tts_chars,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![name, asr_chars, tts_chars, now],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert one grant; returns its id.
    pub fn insert_grant(
        &self,
        identity: &str,
        package_id: i64,
        asr_chars: i64,
        tts_chars: i64,
        expire_at: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let now = now_text();
        conn.execute(
            r#"
            INSERT INTO user_package
            (user_identity, package_id, remain_asr_chars, remain_tts_chars, expire_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![identity, package_id, asr_chars, tts_chars, expire_at, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_grant(&self, id: i64) -> Result<Option<PackageGrant>> {
        let conn = self.conn()?;
        let grant = conn
            .query_row(
                r#"
                SELECT id, user_identity, package_id, remain_asr_chars, remain_tts_chars, expire_at
                FROM user_package WHERE id = ?1
                "#,
                params![id],
                PackageGrant::from_row,
            )
            .optional()?;
        Ok(grant)
    }

    /// Per-grant balance report for the unexpired grants of an identity.
    pub fn list_grants(&self, identity: &str, now: i64) -> Result<Vec<GrantView>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT up.id, up.user_identity, up.package_id, up.remain_asr_chars,
                   up.remain_tts_chars, up.expire_at,
                   COALESCE(p.name, ''), COALESCE(p.quota_asr_chars, 0), COALESCE(p.quota_tts_chars, 0)
            FROM user_package up
            LEFT JOIN package p ON p.id = up.package_id
            WHERE up.user_identity = ?1 AND {live}
            ORDER BY up.expire_at IS NULL, up.expire_at ASC, up.id ASC
            "#,
            live = "(up.expire_at IS NULL OR up.expire_at > ?2)",
        );
        let mut stmt = conn.prepare(&sql)?;
        let views = stmt
            .query_map(params![identity, now], |row| {
                let grant = PackageGrant::from_row(row)?;
                let name: String = row.get(6)?;
                let asr_quota: i64 = row.get(7)?;
                let tts_quota: i64 = row.get(8)?;
                Ok(GrantView::build(&grant, name, asr_quota, tts_quota))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(views)
    }

    /// Issue the named package to each identity, replacing earlier grants of
    /// the same package. Runs in a single transaction; returns the number of
    /// grants written.
    #[instrument(skip(self, identities), fields(count = identities.len()))]
    pub fn seed_grants(
        &self,
        identities: &[String],
        package: &str,
        asr_chars: i64,
        tts_chars: i64,
        expire_at: Option<i64>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let now = now_text();
        let tx = conn.unchecked_transaction()?;

        let package_id: i64 = tx.query_row(
            r#"
            INSERT INTO package (name, quota_asr_chars, quota_tts_chars, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
                quota_asr_chars = excluded.quota_asr_chars,
                quota_tts_chars = excluded.quota_tts_chars,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![package, asr_chars, tts_chars, now],
            |row| row.get(0),
        )?;

        let mut written = 0;
        for identity in identities.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let identity_type = if identity.chars().any(|c| c.is_ascii_digit()) { 2 } else { 1 };

            tx.execute(
                r#"
                INSERT INTO account_user (identity, identity_type, display_name, status, created_at, updated_at)
                VALUES (?1, ?2, ?1, 1, ?3, ?3)
                ON CONFLICT(identity) DO UPDATE SET status = 1, updated_at = excluded.updated_at
                "#,
                params![identity, identity_type, now],
            )?;

            tx.execute(
                "DELETE FROM user_package WHERE user_identity = ?1 AND package_id = ?2",
                params![identity, package_id],
            )?;

            tx.execute(
                r#"
                INSERT INTO user_package
                (user_identity, package_id, remain_asr_chars, remain_tts_chars, expire_at, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                "#,
                params![identity, package_id, asr_chars, tts_chars, expire_at, now],
            )?;
            written += 1;
        }

        tx.commit()?;
        info!("Seeded {} grants of package {}", written, package);
        Ok(written)
    }

    /// Whether an active account row exists for `identity`.
    pub fn account_active(&self, identity: &str) -> Result<bool> {
        let conn = self.conn()?;
        let status: Option<i64> = conn
            .query_row(
                "SELECT status FROM account_user WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status == Some(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_deduct_hits_earliest_expiry_only() {
        let db = Database::in_memory().unwrap();
        let late = db.insert_grant("u1", 0, 0, 500, Some(NOW + 10 * DAY)).unwrap();
        let early = db.insert_grant("u1", 0, 0, 100, Some(NOW + DAY)).unwrap();

        let touched = db.deduct_earliest("u1", QuotaKind::Tts, 60, NOW).unwrap();
        assert_eq!(touched, Some(early));

        assert_eq!(db.find_grant(early).unwrap().unwrap().remain_tts_chars, 40);
        assert_eq!(db.find_grant(late).unwrap().unwrap().remain_tts_chars, 500);
    }

    #[test]
    fn test_deduct_clamps_and_never_splits() {
        let db = Database::in_memory().unwrap();
        let early = db.insert_grant("u1", 0, 30, 0, Some(NOW + DAY)).unwrap();
        let late = db.insert_grant("u1", 0, 100, 0, Some(NOW + 2 * DAY)).unwrap();

        db.deduct_earliest("u1", QuotaKind::Asr, 80, NOW).unwrap();
        assert_eq!(db.find_grant(early).unwrap().unwrap().remain_asr_chars, 0);
        assert_eq!(db.find_grant(late).unwrap().unwrap().remain_asr_chars, 100);

        // The exhausted grant is skipped next time
        let touched = db.deduct_earliest("u1", QuotaKind::Asr, 10, NOW).unwrap();
        assert_eq!(touched, Some(late));
    }

    #[test]
    fn test_expired_and_empty_grants_are_ignored() {
        let db = Database::in_memory().unwrap();
        db.insert_grant("u1", 0, 0, 50, Some(NOW - 1)).unwrap();
        db.insert_grant("u1", 0, 0, 0, None).unwrap();

        assert_eq!(db.sum_remaining("u1", QuotaKind::Tts, NOW).unwrap(), 0);
        assert_eq!(db.deduct_earliest("u1", QuotaKind::Tts, 5, NOW).unwrap(), None);
    }

    #[test]
    fn test_never_expiring_grant_sorts_last() {
        let db = Database::in_memory().unwrap();
        let forever = db.insert_grant("u1", 0, 0, 10, None).unwrap();
        let dated = db.insert_grant("u1", 0, 0, 10, Some(NOW + 5 * DAY)).unwrap();

        assert_eq!(db.deduct_earliest("u1", QuotaKind::Tts, 1, NOW).unwrap(), Some(dated));
        assert_eq!(db.sum_remaining("u1", QuotaKind::Tts, NOW).unwrap(), 19);
        assert_ne!(forever, dated);
    }

    #[test]
    fn test_usage_accumulates() {
        let db = Database::in_memory().unwrap();
        db.add_usage("u1", "2024-06-01", &UsageDelta::asr(10)).unwrap();
        db.add_usage("u1", "2024-06-01", &UsageDelta::translate(4)).unwrap();
        db.add_usage("u1", "2024-06-01", &UsageDelta::tts(7)).unwrap();

        let rows = db.list_usage("u1", 7).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].asr_chars, 10);
        assert_eq!(rows[0].translate_chars, 4);
        assert_eq!(rows[0].tts_chars, 7);
        assert_eq!(rows[0].requests, 2);
    }

    #[test]
    fn test_seed_replaces_previous_grant() {
        let db = Database::in_memory().unwrap();
        let ids = vec!["alice".to_string(), "13800000000".to_string(), " ".to_string()];

        assert_eq!(db.seed_grants(&ids, "beta_seed", 1000, 2000, Some(NOW + 30 * DAY)).unwrap(), 2);
        db.deduct_earliest("alice", QuotaKind::Tts, 500, NOW).unwrap();
        db.seed_grants(&ids[..1], "beta_seed", 1000, 2000, Some(NOW + 30 * DAY)).unwrap();

        let grants = db.list_grants("alice", NOW).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].package_name, "beta_seed");
        assert_eq!(grants[0].tts_remaining, 2000);
        assert_eq!(grants[0].tts_used, 0);
        assert!(db.account_active("13800000000").unwrap());
    }
}
