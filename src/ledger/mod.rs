//! Ledger: deposit, withdraw, and trade execution.
//!
//! Each operation runs inside one SQLite transaction so the account,
//! position, and trade rows it touches change together or not at all.
//! The whole transaction is retried on transient lock contention; business
//! and validation errors are deterministic and returned immediately.
//! Trading is gated exclusively through the market session engine.

use std::sync::Arc;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use crate::audit::{AuditLog, EventKind};
use crate::db::{self, Database};
use crate::market::{self, MarketStatus};
use crate::models::{Position, TradeSide};
use crate::retry::{is_busy, RetryPolicy};

/// Why a ledger operation was refused (or failed).
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("insufficient funds: balance {balance}, required {needed}")]
    InsufficientFunds { balance: Decimal, needed: Decimal },

    #[error("insufficient shares: held {held}, requested {requested}")]
    InsufficientShares { held: Decimal, requested: Decimal },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("market closed: {reason}")]
    MarketClosed {
        reason: String,
        next_open: Option<NaiveDateTime>,
    },

    /// Persistence retries exhausted or unexpected storage error
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// Only lock contention is worth retrying.
    fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage(inner) if is_busy(inner))
    }
}

/// Result of a successful cash or trade operation.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    /// Human-readable confirmation for the presentation layer
    pub message: String,

    /// Cash balance after the operation settled
    pub balance: Decimal,
}

/// Accounting service over the shared store.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    audit: AuditLog,
    retry: RetryPolicy,
}

impl Ledger {
    pub fn new(db: Arc<Database>, audit: AuditLog, retry: RetryPolicy) -> Self {
        Self { db, audit, retry }
    }

    /// Add cash to an account.
    pub async fn deposit(
        &self,
        account_id: i64,
        amount: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        if amount <= Decimal::ZERO {
            self.audit
                .record(
                    EventKind::DepositRejected,
                    &format!("deposit of {amount} rejected: non-positive amount"),
                    Some(account_id),
                )
                .await;
            return Err(LedgerError::InvalidAmount);
        }

        let result = self
            .retry
            .run(LedgerError::is_transient, || {
                self.try_deposit(account_id, amount)
            })
            .await;

        match &result {
            Ok(outcome) => {
                self.audit
                    .record(
                        EventKind::Deposit,
                        &format!("deposited {amount}; balance {}", outcome.balance),
                        Some(account_id),
                    )
                    .await;
                info!(account_id, %amount, balance = %outcome.balance, "deposit");
            }
            Err(e @ LedgerError::NotFound(_)) => {
                self.audit
                    .record(
                        EventKind::DepositRejected,
                        &format!("deposit of {amount} rejected: {e}"),
                        Some(account_id),
                    )
                    .await;
            }
            Err(_) => {}
        }

        result
    }

    async fn try_deposit(
        &self,
        account_id: i64,
        amount: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let mut account = db::get_account(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;

        account.balance += amount;
        account.total_deposited += amount;
        db::update_account_cash(&mut tx, &account).await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(TradeOutcome {
            message: format!("Deposited {amount}"),
            balance: account.balance,
        })
    }

    /// Remove cash from an account. The balance never goes negative.
    pub async fn withdraw(
        &self,
        account_id: i64,
        amount: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        if amount <= Decimal::ZERO {
            self.audit
                .record(
                    EventKind::WithdrawalRejected,
                    &format!("withdrawal of {amount} rejected: non-positive amount"),
                    Some(account_id),
                )
                .await;
            return Err(LedgerError::InvalidAmount);
        }

        let result = self
            .retry
            .run(LedgerError::is_transient, || {
                self.try_withdraw(account_id, amount)
            })
            .await;

        match &result {
            Ok(outcome) => {
                self.audit
                    .record(
                        EventKind::Withdrawal,
                        &format!("withdrew {amount}; balance {}", outcome.balance),
                        Some(account_id),
                    )
                    .await;
                info!(account_id, %amount, balance = %outcome.balance, "withdrawal");
            }
            Err(LedgerError::InsufficientFunds { balance, .. }) => {
                self.audit
                    .record(
                        EventKind::WithdrawalRejected,
                        &format!("withdrawal of {amount} rejected: balance {balance}"),
                        Some(account_id),
                    )
                    .await;
            }
            Err(e @ LedgerError::NotFound(_)) => {
                self.audit
                    .record(
                        EventKind::WithdrawalRejected,
                        &format!("withdrawal of {amount} rejected: {e}"),
                        Some(account_id),
                    )
                    .await;
            }
            Err(_) => {}
        }

        result
    }

    async fn try_withdraw(
        &self,
        account_id: i64,
        amount: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let mut account = db::get_account(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;

        if !account.can_afford(amount) {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                needed: amount,
            });
        }

        account.balance -= amount;
        account.total_withdrawn += amount;
        db::update_account_cash(&mut tx, &account).await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(TradeOutcome {
            message: format!("Withdrew {amount}"),
            balance: account.balance,
        })
    }

    /// Buy `quantity` shares of `symbol` at the current quote.
    ///
    /// `now` is the market-local time used for session gating.
    pub async fn execute_buy(
        &self,
        account_id: i64,
        symbol: &str,
        quantity: Decimal,
        now: NaiveDateTime,
    ) -> Result<TradeOutcome, LedgerError> {
        if quantity <= Decimal::ZERO {
            self.reject_trade(account_id, symbol, "buy", "non-positive quantity")
                .await;
            return Err(LedgerError::InvalidQuantity);
        }

        self.check_market_open(account_id, symbol, "buy", now).await?;

        let result = self
            .retry
            .run(LedgerError::is_transient, || {
                self.try_buy(account_id, symbol, quantity)
            })
            .await;

        match &result {
            Ok(outcome) => {
                self.audit
                    .record(EventKind::Buy, &outcome.message, Some(account_id))
                    .await;
                info!(account_id, symbol, %quantity, balance = %outcome.balance, "buy executed");
            }
            Err(e @ (LedgerError::InsufficientFunds { .. } | LedgerError::NotFound(_))) => {
                self.reject_trade(account_id, symbol, "buy", &e.to_string())
                    .await;
            }
            Err(_) => {}
        }

        result
    }

    async fn try_buy(
        &self,
        account_id: i64,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let mut account = db::get_account(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        let instrument = db::get_instrument_by_symbol(&mut tx, symbol)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("instrument {symbol}")))?;

        // One price read inside the transaction; cost uses this value only.
        let price = instrument.price;
        let cost = quantity * price;

        if !account.can_afford(cost) {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                needed: cost,
            });
        }

        account.balance -= cost;

        let position = match db::get_position(&mut tx, account_id, instrument.id).await? {
            Some(mut existing) => {
                existing.add(quantity, price);
                existing
            }
            None => Position::open(account_id, instrument.id, quantity, price),
        };
        db::upsert_position(&mut tx, &position).await?;
        db::update_account_cash(&mut tx, &account).await?;
        db::insert_trade(
            &mut tx,
            account_id,
            instrument.id,
            TradeSide::Buy,
            quantity,
            price,
            account.balance,
            Decimal::ZERO,
        )
        .await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(TradeOutcome {
            message: format!(
                "Bought {quantity} {symbol} at {price} (cost {cost}); balance {}",
                account.balance
            ),
            balance: account.balance,
        })
    }

    /// Sell `quantity` shares of `symbol` at the current quote.
    pub async fn execute_sell(
        &self,
        account_id: i64,
        symbol: &str,
        quantity: Decimal,
        now: NaiveDateTime,
    ) -> Result<TradeOutcome, LedgerError> {
        if quantity <= Decimal::ZERO {
            self.reject_trade(account_id, symbol, "sell", "non-positive quantity")
                .await;
            return Err(LedgerError::InvalidQuantity);
        }

        self.check_market_open(account_id, symbol, "sell", now).await?;

        let result = self
            .retry
            .run(LedgerError::is_transient, || {
                self.try_sell(account_id, symbol, quantity)
            })
            .await;

        match &result {
            Ok(outcome) => {
                self.audit
                    .record(EventKind::Sell, &outcome.message, Some(account_id))
                    .await;
                info!(account_id, symbol, %quantity, balance = %outcome.balance, "sell executed");
            }
            Err(e @ (LedgerError::InsufficientShares { .. } | LedgerError::NotFound(_))) => {
                self.reject_trade(account_id, symbol, "sell", &e.to_string())
                    .await;
            }
            Err(_) => {}
        }

        result
    }

    async fn try_sell(
        &self,
        account_id: i64,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<TradeOutcome, LedgerError> {
        let mut tx = self.db.pool().begin().await.map_err(anyhow::Error::from)?;

        let mut account = db::get_account(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        let instrument = db::get_instrument_by_symbol(&mut tx, symbol)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("instrument {symbol}")))?;

        let mut position = db::get_position(&mut tx, account_id, instrument.id)
            .await?
            .ok_or_else(|| LedgerError::InsufficientShares {
                held: Decimal::ZERO,
                requested: quantity,
            })?;

        if position.quantity < quantity {
            return Err(LedgerError::InsufficientShares {
                held: position.quantity,
                requested: quantity,
            });
        }

        let price = instrument.price;
        let proceeds = quantity * price;
        let realized_pl = position.reduce(quantity, price);

        account.balance += proceeds;

        if position.is_closed() {
            db::delete_position(&mut tx, account_id, instrument.id).await?;
        } else {
            db::upsert_position(&mut tx, &position).await?;
        }
        db::update_account_cash(&mut tx, &account).await?;
        db::insert_trade(
            &mut tx,
            account_id,
            instrument.id,
            TradeSide::Sell,
            quantity,
            price,
            account.balance,
            realized_pl,
        )
        .await?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        Ok(TradeOutcome {
            message: format!(
                "Sold {quantity} {symbol} at {price} (proceeds {proceeds}, realized P/L {realized_pl}); balance {}",
                account.balance
            ),
            balance: account.balance,
        })
    }

    /// Gate a trade through the session engine; audits the rejection.
    async fn check_market_open(
        &self,
        account_id: i64,
        symbol: &str,
        action: &str,
        now: NaiveDateTime,
    ) -> Result<(), LedgerError> {
        let schedule = self
            .db
            .market_schedule()
            .await
            .map_err(LedgerError::Storage)?;

        match market::market_status(&schedule, now) {
            MarketStatus::Open => Ok(()),
            MarketStatus::Closed { reason, next_open } => {
                self.reject_trade(account_id, symbol, action, &reason).await;
                Err(LedgerError::MarketClosed { reason, next_open })
            }
        }
    }

    async fn reject_trade(&self, account_id: i64, symbol: &str, action: &str, reason: &str) {
        self.audit
            .record(
                EventKind::TradeRejected,
                &format!("{action} {symbol} rejected: {reason}"),
                Some(account_id),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal_macros::dec;

    struct Fixture {
        db: Arc<Database>,
        ledger: Ledger,
        audit: AuditLog,
        account_id: i64,
    }

    /// Wednesday 2025-06-04 at noon: inside the default Mon-Fri session.
    fn open_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// Saturday 2025-06-07 at 10:00: outside the default session.
    fn closed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 7)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let audit = AuditLog::new(db.clone(), RetryPolicy::default());
        let ledger = Ledger::new(db.clone(), audit.clone(), RetryPolicy::default());

        let account = db.create_account("alice", "alice@example.com").await.unwrap();
        db.create_instrument("ACME", "Acme Corp", dec!(50.00))
            .await
            .unwrap();

        Fixture {
            db,
            ledger,
            audit,
            account_id: account.id,
        }
    }

    async fn set_price(f: &Fixture, symbol: &str, price: Decimal) {
        let inst = f.db.instrument_by_symbol(symbol).await.unwrap().unwrap();
        let mut conn = f.db.pool().acquire().await.unwrap();
        db::update_instrument_price(&mut conn, inst.id, price)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw() {
        let f = fixture().await;

        let outcome = f.ledger.deposit(f.account_id, dec!(250.50)).await.unwrap();
        assert_eq!(outcome.balance, dec!(250.50));

        let outcome = f.ledger.withdraw(f.account_id, dec!(50.50)).await.unwrap();
        assert_eq!(outcome.balance, dec!(200));

        let account = f.db.account(f.account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(200));
        assert_eq!(account.total_deposited, dec!(250.50));
        assert_eq!(account.total_withdrawn, dec!(50.50));
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.ledger.deposit(f.account_id, dec!(0)).await,
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            f.ledger.withdraw(f.account_id, dec!(-5)).await,
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            f.ledger
                .execute_buy(f.account_id, "ACME", dec!(0), open_time())
                .await,
            Err(LedgerError::InvalidQuantity)
        ));
    }

    #[tokio::test]
    async fn test_overdraw_rejected_and_state_unchanged() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(100)).await.unwrap();

        let err = f.ledger.withdraw(f.account_id, dec!(100.01)).await;
        assert!(matches!(err, Err(LedgerError::InsufficientFunds { .. })));

        let account = f.db.account(f.account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(100));
        assert_eq!(account.total_withdrawn, dec!(0));
    }

    #[tokio::test]
    async fn test_buy_then_sell_scenario() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000.00)).await.unwrap();

        // Buy 10 at 50.00
        let outcome = f
            .ledger
            .execute_buy(f.account_id, "ACME", dec!(10), open_time())
            .await
            .unwrap();
        assert_eq!(outcome.balance, dec!(500.00));

        let positions = f.db.positions_for_account(f.account_id).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(10));
        assert_eq!(positions[0].avg_cost, dec!(50.00));

        // Price moves to 60.00; sell 4.
        set_price(&f, "ACME", dec!(60.00)).await;
        let outcome = f
            .ledger
            .execute_sell(f.account_id, "ACME", dec!(4), open_time())
            .await
            .unwrap();
        assert_eq!(outcome.balance, dec!(740.00));

        let positions = f.db.positions_for_account(f.account_id).await.unwrap();
        assert_eq!(positions[0].quantity, dec!(6));
        assert_eq!(positions[0].avg_cost, dec!(50.00)); // unchanged by the sell

        let trades = f.db.trades_for_account(f.account_id, 10).await.unwrap();
        assert_eq!(trades.len(), 2);
        // Newest first: the sell.
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].realized_pl, dec!(40.00));
        assert_eq!(trades[0].cash_after, dec!(740.00));
        assert_eq!(trades[1].side, TradeSide::Buy);
        assert_eq!(trades[1].realized_pl, dec!(0));
    }

    #[tokio::test]
    async fn test_average_cost_blends_across_buys() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(10000)).await.unwrap();

        f.ledger
            .execute_buy(f.account_id, "ACME", dec!(10), open_time())
            .await
            .unwrap();
        set_price(&f, "ACME", dec!(60.00)).await;
        f.ledger
            .execute_buy(f.account_id, "ACME", dec!(30), open_time())
            .await
            .unwrap();

        // (10*50 + 30*60) / 40 = 57.5 exactly
        let positions = f.db.positions_for_account(f.account_id).await.unwrap();
        assert_eq!(positions[0].quantity, dec!(40));
        assert_eq!(positions[0].avg_cost, dec!(57.5));
        assert_eq!(positions[0].total_invested, dec!(2300.00));
    }

    #[tokio::test]
    async fn test_full_sell_deletes_position() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000)).await.unwrap();
        f.ledger
            .execute_buy(f.account_id, "ACME", dec!(10), open_time())
            .await
            .unwrap();

        f.ledger
            .execute_sell(f.account_id, "ACME", dec!(10), open_time())
            .await
            .unwrap();

        let positions = f.db.positions_for_account(f.account_id).await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn test_oversell_rejected() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000)).await.unwrap();
        f.ledger
            .execute_buy(f.account_id, "ACME", dec!(10), open_time())
            .await
            .unwrap();

        let err = f
            .ledger
            .execute_sell(f.account_id, "ACME", dec!(11), open_time())
            .await;
        assert!(matches!(
            err,
            Err(LedgerError::InsufficientShares { held, requested })
                if held == dec!(10) && requested == dec!(11)
        ));

        // Nothing moved.
        let positions = f.db.positions_for_account(f.account_id).await.unwrap();
        assert_eq!(positions[0].quantity, dec!(10));
        let account = f.db.account(f.account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(500));
    }

    #[tokio::test]
    async fn test_buy_without_funds_rejected() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(100)).await.unwrap();

        let err = f
            .ledger
            .execute_buy(f.account_id, "ACME", dec!(3), open_time())
            .await;
        assert!(matches!(
            err,
            Err(LedgerError::InsufficientFunds { balance, needed })
                if balance == dec!(100) && needed == dec!(150.00)
        ));

        let account = f.db.account(f.account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(100));
        assert!(f.db.positions_for_account(f.account_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_account_and_symbol() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000)).await.unwrap();

        assert!(matches!(
            f.ledger.deposit(999, dec!(10)).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            f.ledger
                .execute_buy(f.account_id, "NOPE", dec!(1), open_time())
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_account_cash_ops_audited() {
        let f = fixture().await;

        assert!(matches!(
            f.ledger.deposit(999, dec!(10)).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            f.ledger.withdraw(999, dec!(10)).await,
            Err(LedgerError::NotFound(_))
        ));

        let deposits = f
            .audit
            .query(Some(EventKind::DepositRejected), 10, 0)
            .await
            .unwrap();
        assert_eq!(deposits.len(), 1);
        assert!(deposits[0].detail.contains("not found"));

        let withdrawals = f
            .audit
            .query(Some(EventKind::WithdrawalRejected), 10, 0)
            .await
            .unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert!(withdrawals[0].detail.contains("not found"));
    }

    // A file-backed pool with several connections, so two transactions can
    // actually contend. Two buys costing 500.00 each against a 600.00
    // balance: exactly one may settle, the other must re-read the updated
    // balance and be rejected instead of double-spending.
    #[tokio::test]
    async fn test_concurrent_buys_serialized_per_account() {
        let path = std::env::temp_dir().join(format!(
            "paperdesk-ledger-test-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite:{}?mode=rwc", path.display());

        let db = Arc::new(Database::new(&url).await.unwrap());
        let audit = AuditLog::new(db.clone(), RetryPolicy::default());
        let ledger = Ledger::new(db.clone(), audit, RetryPolicy::default());

        let account = db.create_account("alice", "alice@example.com").await.unwrap();
        db.create_instrument("ACME", "Acme Corp", dec!(50.00))
            .await
            .unwrap();
        ledger.deposit(account.id, dec!(600)).await.unwrap();

        let account_id = account.id;
        let l1 = ledger.clone();
        let l2 = ledger.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                l1.execute_buy(account_id, "ACME", dec!(10), open_time()).await
            }),
            tokio::spawn(async move {
                l2.execute_buy(account_id, "ACME", dec!(10), open_time()).await
            }),
        );
        let results = [a.unwrap(), b.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "results: {results:?}");

        let refreshed = db.account(account_id).await.unwrap().unwrap();
        assert_eq!(refreshed.balance, dec!(100.00));
        let positions = db.positions_for_account(account_id).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(10));

        db.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_buy_while_closed_rejected_but_audited() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000)).await.unwrap();

        let err = f
            .ledger
            .execute_buy(f.account_id, "ACME", dec!(10), closed_time())
            .await;
        match err {
            Err(LedgerError::MarketClosed { reason, next_open }) => {
                assert!(reason.contains("Saturday"), "reason was {reason:?}");
                assert!(next_open.is_some());
            }
            other => panic!("expected MarketClosed, got {other:?}"),
        }

        // No mutation, but a distinct audit entry for the failed attempt.
        let account = f.db.account(f.account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(1000));
        assert!(f.db.positions_for_account(f.account_id).await.unwrap().is_empty());
        assert!(f.db.trades_for_account(f.account_id, 10).await.unwrap().is_empty());

        let rejected = f
            .audit
            .query(Some(EventKind::TradeRejected), 10, 0)
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].detail.contains("Saturday"));
    }

    #[tokio::test]
    async fn test_override_halts_trading() {
        let f = fixture().await;
        f.ledger.deposit(f.account_id, dec!(1000)).await.unwrap();

        let mut schedule = f.db.market_schedule().await.unwrap();
        schedule.manual_override = true;
        schedule.override_message = Some("Emergency halt".to_string());
        f.db.save_market_schedule(&schedule).await.unwrap();

        let err = f
            .ledger
            .execute_buy(f.account_id, "ACME", dec!(1), open_time())
            .await;
        assert!(matches!(
            err,
            Err(LedgerError::MarketClosed { reason, .. }) if reason == "Emergency halt"
        ));
    }
}
