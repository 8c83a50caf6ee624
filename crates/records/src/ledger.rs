//! Spending ledger
//!
//! Amounts are integer micro-credits so repeated additions never drift.
//! One row per `(agent, zone, period_type, period_start)`; recording a
//! spend upserts the daily, weekly, and monthly rows in one transaction.
//! Policy evaluation reads the ledger and answers allow/deny with a
//! reason; the approvals workflow lives outside the core.

use crate::models::{now_ms, LedgerRecord};
use crate::store::{db_err, RecordStore};
use chrono::{Datelike, TimeZone, Utc};
use nexus_core::Result;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Budget period granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    /// Stable string form stored in the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }

    /// Start of the period containing `at_ms`, in epoch milliseconds (UTC)
    pub fn period_start(&self, at_ms: i64) -> i64 {
        let dt = Utc
            .timestamp_millis_opt(at_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let date = dt.date_naive();
        let start_date = match self {
            PeriodType::Daily => date,
            PeriodType::Weekly => {
                date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            PeriodType::Monthly => date.with_day(1).unwrap_or(date),
        };
        start_date
            .and_hms_opt(0, 0, 0)
            .map(|ndt| ndt.and_utc().timestamp_millis())
            .unwrap_or(at_ms)
    }
}

/// Per-period spending limits, in micro-credits
#[derive(Debug, Clone, Default)]
pub struct SpendingPolicy {
    pub daily_limit_micro: Option<i64>,
    pub weekly_limit_micro: Option<i64>,
    pub monthly_limit_micro: Option<i64>,
    /// Largest single transaction allowed
    pub per_tx_limit_micro: Option<i64>,
    /// Most transactions allowed per day
    pub daily_tx_limit: Option<u64>,
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendDecision {
    pub allowed: bool,
    /// Which limit denied the spend, when denied
    pub reason: Option<String>,
}

impl SpendDecision {
    fn allow() -> Self {
        SpendDecision {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        SpendDecision {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

fn row_to_ledger(row: &Row<'_>) -> rusqlite::Result<LedgerRecord> {
    Ok(LedgerRecord {
        ledger_id: row.get("ledger_id")?,
        agent_id: row.get("agent_id")?,
        zone_id: row.get("zone_id")?,
        period_type: row.get("period_type")?,
        period_start: row.get("period_start")?,
        amount_spent_micro: row.get("amount_spent_micro")?,
        tx_count: row.get::<_, i64>("tx_count")? as u64,
        updated_at: row.get("updated_at")?,
    })
}

impl RecordStore {
    /// Record one spend against all three period rows
    pub fn record_spend(&self, agent_id: &str, zone_id: &str, amount_micro: i64) -> Result<()> {
        let now = now_ms();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        for period in [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly] {
            tx.execute(
                "INSERT INTO spending_ledger (ledger_id, agent_id, zone_id, period_type, \
                 period_start, amount_spent_micro, tx_count, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7) \
                 ON CONFLICT (agent_id, zone_id, period_type, period_start) DO UPDATE SET \
                 amount_spent_micro = amount_spent_micro + ?6, \
                 tx_count = tx_count + 1, updated_at = ?7",
                params![
                    Uuid::new_v4().to_string(),
                    agent_id,
                    zone_id,
                    period.as_str(),
                    period.period_start(now),
                    amount_micro,
                    now,
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// The ledger row for the current period, if any spend was recorded
    pub fn get_spend(
        &self,
        agent_id: &str,
        zone_id: &str,
        period: PeriodType,
    ) -> Result<Option<LedgerRecord>> {
        let period_start = period.period_start(now_ms());
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM spending_ledger WHERE agent_id = ?1 AND zone_id = ?2 \
             AND period_type = ?3 AND period_start = ?4",
            params![agent_id, zone_id, period.as_str(), period_start],
            row_to_ledger,
        )
        .optional()
        .map_err(db_err)
    }

    /// Evaluate a prospective spend against a policy
    ///
    /// Checks the per-transaction cap first, then each period limit in
    /// daily/weekly/monthly order, then the daily transaction count.
    pub fn evaluate_spend(
        &self,
        agent_id: &str,
        zone_id: &str,
        amount_micro: i64,
        policy: &SpendingPolicy,
    ) -> Result<SpendDecision> {
        if amount_micro < 0 {
            return Ok(SpendDecision::deny("negative amount"));
        }
        if let Some(cap) = policy.per_tx_limit_micro {
            if amount_micro > cap {
                return Ok(SpendDecision::deny(format!(
                    "per-transaction limit exceeded: {amount_micro} > {cap}"
                )));
            }
        }

        let checks = [
            (PeriodType::Daily, policy.daily_limit_micro),
            (PeriodType::Weekly, policy.weekly_limit_micro),
            (PeriodType::Monthly, policy.monthly_limit_micro),
        ];
        for (period, limit) in checks {
            let Some(limit) = limit else { continue };
            let spent = self
                .get_spend(agent_id, zone_id, period)?
                .map(|r| r.amount_spent_micro)
                .unwrap_or(0);
            if spent + amount_micro > limit {
                return Ok(SpendDecision::deny(format!(
                    "{} limit exceeded: {} + {} > {}",
                    period.as_str(),
                    spent,
                    amount_micro,
                    limit
                )));
            }
        }

        if let Some(tx_limit) = policy.daily_tx_limit {
            let count = self
                .get_spend(agent_id, zone_id, PeriodType::Daily)?
                .map(|r| r.tx_count)
                .unwrap_or(0);
            if count >= tx_limit {
                return Ok(SpendDecision::deny(format!(
                    "daily transaction limit reached: {count} >= {tx_limit}"
                )));
            }
        }

        Ok(SpendDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_spend_upserts_all_periods() {
        let store = RecordStore::open_in_memory().unwrap();
        store.record_spend("a1", "default", 500).unwrap();
        store.record_spend("a1", "default", 250).unwrap();

        for period in [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly] {
            let row = store.get_spend("a1", "default", period).unwrap().unwrap();
            assert_eq!(row.amount_spent_micro, 750);
            assert_eq!(row.tx_count, 2);
        }
    }

    #[test]
    fn test_spend_isolated_per_agent_and_zone() {
        let store = RecordStore::open_in_memory().unwrap();
        store.record_spend("a1", "default", 100).unwrap();
        store.record_spend("a2", "default", 200).unwrap();
        store.record_spend("a1", "zone-b", 300).unwrap();

        assert_eq!(
            store
                .get_spend("a1", "default", PeriodType::Daily)
                .unwrap()
                .unwrap()
                .amount_spent_micro,
            100
        );
        assert_eq!(
            store
                .get_spend("a2", "default", PeriodType::Daily)
                .unwrap()
                .unwrap()
                .amount_spent_micro,
            200
        );
    }

    #[test]
    fn test_evaluate_daily_limit() {
        let store = RecordStore::open_in_memory().unwrap();
        let policy = SpendingPolicy {
            daily_limit_micro: Some(1_000),
            ..SpendingPolicy::default()
        };

        assert!(store
            .evaluate_spend("a1", "default", 900, &policy)
            .unwrap()
            .allowed);
        store.record_spend("a1", "default", 900).unwrap();

        let decision = store.evaluate_spend("a1", "default", 200, &policy).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("daily"));
    }

    #[test]
    fn test_evaluate_per_tx_limit() {
        let store = RecordStore::open_in_memory().unwrap();
        let policy = SpendingPolicy {
            per_tx_limit_micro: Some(100),
            ..SpendingPolicy::default()
        };
        assert!(!store
            .evaluate_spend("a1", "default", 101, &policy)
            .unwrap()
            .allowed);
        assert!(store
            .evaluate_spend("a1", "default", 100, &policy)
            .unwrap()
            .allowed);
    }

    #[test]
    fn test_evaluate_tx_count_limit() {
        let store = RecordStore::open_in_memory().unwrap();
        let policy = SpendingPolicy {
            daily_tx_limit: Some(2),
            ..SpendingPolicy::default()
        };
        store.record_spend("a1", "default", 1).unwrap();
        store.record_spend("a1", "default", 1).unwrap();
        let decision = store.evaluate_spend("a1", "default", 1, &policy).unwrap();
        assert!(!decision.allowed);
    }

    #[test]
    fn test_no_limits_allows_everything() {
        let store = RecordStore::open_in_memory().unwrap();
        let policy = SpendingPolicy::default();
        assert!(store
            .evaluate_spend("a1", "default", i64::MAX / 2, &policy)
            .unwrap()
            .allowed);
    }

    #[test]
    fn test_period_start_ordering() {
        let now = now_ms();
        let daily = PeriodType::Daily.period_start(now);
        let weekly = PeriodType::Weekly.period_start(now);
        let monthly = PeriodType::Monthly.period_start(now);
        assert!(daily <= now);
        assert!(weekly <= daily);
        assert!(monthly <= now);
    }
}
