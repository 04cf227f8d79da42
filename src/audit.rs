//! Append-only audit log.
//!
//! Every state-changing action is recorded, including rejected attempts,
//! so the log is a complete action history rather than a success list.
//! Writes retry on transient contention; an exhausted write is reported to
//! the operational log and swallowed, so audit failure never fails the
//! business operation that triggered it.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::error;

use crate::db::Database;
use crate::retry::{is_busy, RetryPolicy};

/// What happened. Codes are stable so exported history stays comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Deposit,
    Withdrawal,
    Buy,
    Sell,
    /// A trade rejected by validation, funds checks, or the market gate
    TradeRejected,
    /// A withdrawal rejected by validation or funds checks
    WithdrawalRejected,
    /// A deposit rejected by validation
    DepositRejected,
    ScheduleChanged,
    GeneratorChanged,
    /// Login/logout events from the presentation layer
    Auth,
}

impl EventKind {
    pub fn code(&self) -> i64 {
        match self {
            EventKind::Deposit => 1,
            EventKind::Withdrawal => 2,
            EventKind::Buy => 3,
            EventKind::Sell => 4,
            EventKind::TradeRejected => 5,
            EventKind::WithdrawalRejected => 6,
            EventKind::DepositRejected => 10,
            EventKind::ScheduleChanged => 7,
            EventKind::GeneratorChanged => 8,
            EventKind::Auth => 9,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EventKind::Deposit),
            2 => Some(EventKind::Withdrawal),
            3 => Some(EventKind::Buy),
            4 => Some(EventKind::Sell),
            5 => Some(EventKind::TradeRejected),
            6 => Some(EventKind::WithdrawalRejected),
            7 => Some(EventKind::ScheduleChanged),
            8 => Some(EventKind::GeneratorChanged),
            9 => Some(EventKind::Auth),
            10 => Some(EventKind::DepositRejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deposit => "deposit",
            EventKind::Withdrawal => "withdrawal",
            EventKind::Buy => "buy",
            EventKind::Sell => "sell",
            EventKind::TradeRejected => "trade-rejected",
            EventKind::WithdrawalRejected => "withdrawal-rejected",
            EventKind::DepositRejected => "deposit-rejected",
            EventKind::ScheduleChanged => "schedule-changed",
            EventKind::GeneratorChanged => "generator-changed",
            EventKind::Auth => "auth",
        }
    }
}

/// One immutable log entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub kind: EventKind,
    pub detail: String,
    pub account_id: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: i64,
    code: i64,
    detail: String,
    account_id: Option<i64>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = anyhow::Error;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEntry {
            id: row.id,
            kind: EventKind::from_code(row.code)
                .with_context(|| format!("unknown audit code {}", row.code))?,
            detail: row.detail,
            account_id: row.account_id,
            recorded_at: row.recorded_at,
        })
    }
}

/// Resilient audit writer shared by the ledger and admin entry points.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<Database>,
    retry: RetryPolicy,
}

impl AuditLog {
    pub fn new(db: Arc<Database>, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Append an entry. Retries on contention; on exhaustion the failure is
    /// reported via the operational log and discarded.
    pub async fn record(&self, kind: EventKind, detail: &str, account_id: Option<i64>) {
        let result = self
            .retry
            .run(is_busy, || async {
                sqlx::query(
                    "INSERT INTO audit_log (code, detail, account_id, recorded_at) VALUES (?, ?, ?, ?)",
                )
                .bind(kind.code())
                .bind(detail)
                .bind(account_id)
                .bind(Utc::now())
                .execute(self.db.pool())
                .await
                .map_err(anyhow::Error::from)
            })
            .await;

        if let Err(e) = result {
            error!(kind = kind.as_str(), detail, error = %e, "audit write failed, entry dropped");
        }
    }

    /// Paged read, newest first, with an optional kind filter.
    pub async fn query(
        &self,
        kind: Option<EventKind>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM audit_log WHERE code = ?
                    ORDER BY recorded_at DESC, id DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(kind.code())
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM audit_log ORDER BY recorded_at DESC, id DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_log() -> AuditLog {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        AuditLog::new(db, RetryPolicy::default())
    }

    #[test]
    fn test_codes_round_trip() {
        for kind in [
            EventKind::Deposit,
            EventKind::Withdrawal,
            EventKind::Buy,
            EventKind::Sell,
            EventKind::TradeRejected,
            EventKind::WithdrawalRejected,
            EventKind::DepositRejected,
            EventKind::ScheduleChanged,
            EventKind::GeneratorChanged,
            EventKind::Auth,
        ] {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EventKind::from_code(42), None);
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let log = memory_log().await;

        log.record(EventKind::Deposit, "deposit of 100.00", Some(1)).await;
        log.record(EventKind::TradeRejected, "market closed", Some(1)).await;
        log.record(EventKind::ScheduleChanged, "open_time 09:30 -> 10:00", None).await;

        let all = log.query(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);

        let rejected = log.query(Some(EventKind::TradeRejected), 10, 0).await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].detail, "market closed");
        assert_eq!(rejected[0].account_id, Some(1));
    }

    #[tokio::test]
    async fn test_pagination() {
        let log = memory_log().await;
        for i in 0..5 {
            log.record(EventKind::Deposit, &format!("deposit {i}"), None).await;
        }

        let first = log.query(None, 2, 0).await.unwrap();
        let second = log.query(None, 2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_ne!(first[0].id, second[0].id);
    }
}
