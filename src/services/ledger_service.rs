//! Ledger service - gold awards, balances and balance repair
//!
//! The transaction log is the source of truth. `user_balances` is a cache that
//! every append updates in the same write transaction; `recompute_balance`
//! rebuilds it from the log when the two disagree.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::models::{Transaction, TransactionType};
use crate::db::transactions::{self, LedgerEntry};
use crate::db::Database;
use crate::error::CoreError;

use super::events::{CoreEvent, EventBus};
use super::RepairReport;

/// Cached balance compared with the ledger sum
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct BalanceCheck {
    pub user_id: String,
    pub cached: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

impl BalanceCheck {
    /// Drift as an error value, for logging
    pub fn drift(&self) -> Option<CoreError> {
        (!self.consistent).then(|| CoreError::Consistency {
            user_id: self.user_id.clone(),
            cached: self.cached,
            ledger: self.ledger_sum,
        })
    }
}

/// Append a ledger entry inside the caller's write transaction
///
/// Debits fail with `Validation` when the cached balance cannot cover them.
pub(crate) fn record_in(
    conn: &mut SqliteConnection,
    entry: &LedgerEntry<'_>,
) -> Result<Transaction, CoreError> {
    if entry.user_id.is_empty() {
        return Err(CoreError::Validation("user_id is required".into()));
    }

    if entry.amount < 0 {
        let balance = transactions::cached_balance(conn, entry.user_id)?;
        if balance < -entry.amount {
            return Err(CoreError::Validation(format!(
                "insufficient gold: balance {}, required {}",
                balance, -entry.amount
            )));
        }
    }

    let transaction = transactions::append(conn, entry)?;
    debug!(
        user_id = %entry.user_id,
        amount = entry.amount,
        transaction_type = %entry.transaction_type,
        transaction_id = %transaction.id,
        "Ledger entry appended"
    );
    Ok(transaction)
}

/// Ledger service for business logic
pub struct LedgerService {
    db: Database,
    events: Arc<EventBus>,
}

impl LedgerService {
    /// Create a new ledger service
    pub fn new(db: Database, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Cached balance (0 for users with no ledger activity)
    pub fn get_balance(&self, user_id: &str) -> Result<i64, CoreError> {
        self.db.with_conn(|conn| transactions::cached_balance(conn, user_id))
    }

    /// A user's transactions, newest first
    pub fn list_transactions(&self, user_id: &str, limit: i64) -> Result<Vec<Transaction>, CoreError> {
        self.db.with_conn(|conn| transactions::list_for_user(conn, user_id, limit.max(1)))
    }

    /// Compare the cached balance with the ledger sum without repairing it
    pub fn check_balance(&self, user_id: &str) -> Result<BalanceCheck, CoreError> {
        let check = self.db.with_conn(|conn| {
            let cached = transactions::cached_balance(conn, user_id)?;
            let summary = transactions::ledger_summary(conn, user_id)?;
            Ok(BalanceCheck {
                user_id: user_id.to_string(),
                cached,
                ledger_sum: summary.ledger_sum,
                consistent: cached == summary.ledger_sum,
            })
        })?;

        if let Some(drift) = check.drift() {
            warn!(user_id = %user_id, error = %drift, "Balance cache out of sync with ledger");
        }

        Ok(check)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Append a transaction and apply it to the balance cache atomically
    pub fn record_transaction(
        &self,
        user_id: &str,
        amount: i64,
        transaction_type: TransactionType,
        quest_id: Option<&str>,
        description: &str,
        commission_fee: i64,
    ) -> Result<Transaction, CoreError> {
        if commission_fee < 0 {
            return Err(CoreError::Validation("commission_fee must be >= 0".into()));
        }

        let entry = LedgerEntry {
            user_id,
            amount,
            transaction_type,
            quest_id,
            payment_proof_id: None,
            commission_fee,
            description,
        };

        self.db.with_write_tx(|conn| record_in(conn, &entry))
    }

    /// Credit a positive REWARD
    pub fn award_gold(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        quest_id: Option<&str>,
    ) -> Result<Transaction, CoreError> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "award amount must be positive, got {}",
                amount
            )));
        }

        let transaction =
            self.record_transaction(user_id, amount, TransactionType::Reward, quest_id, reason, 0)?;

        info!(user_id = %user_id, amount, reason = %reason, "Gold awarded");
        self.events.emit(CoreEvent::GoldAwarded {
            user_id: user_id.to_string(),
            amount,
            transaction_id: transaction.id.clone(),
            quest_id: transaction.quest_id.clone(),
        });

        Ok(transaction)
    }

    /// Overwrite the cached balance with the ledger sum; returns the new balance
    pub fn recompute_balance(&self, user_id: &str) -> Result<i64, CoreError> {
        let (_, balance) = self.recompute_one(user_id)?;
        Ok(balance)
    }

    /// Recompute every known user's balance, continuing past failures
    pub fn recompute_all_balances(&self) -> Result<RepairReport, CoreError> {
        let user_ids = self.db.with_conn(transactions::all_user_ids)?;
        let mut report = RepairReport::default();

        for user_id in &user_ids {
            report.examined += 1;
            match self.recompute_one(user_id) {
                Ok((previous, balance)) if previous != balance => report.repaired += 1,
                Ok(_) => {}
                Err(e) => report.record_failure(user_id, &e),
            }
        }

        info!(
            examined = report.examined,
            repaired = report.repaired,
            failed = report.failed,
            "Balance recompute sweep finished"
        );
        Ok(report)
    }

    /// Returns (previous cached balance, recomputed balance)
    fn recompute_one(&self, user_id: &str) -> Result<(i64, i64), CoreError> {
        let (previous, balance) = self.db.with_write_tx(|conn| {
            let previous = transactions::cached_balance(conn, user_id)?;
            let summary = transactions::ledger_summary(conn, user_id)?;
            transactions::overwrite_balance(conn, user_id, summary.ledger_sum)?;
            Ok((previous, summary.ledger_sum))
        })?;

        if previous != balance {
            warn!(user_id = %user_id, previous, balance, "Repaired drifted balance cache");
            self.events.emit(CoreEvent::BalanceRepaired {
                user_id: user_id.to_string(),
                previous,
                balance,
            });
        }

        Ok((previous, balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use diesel::connection::SimpleConnection;

    fn service() -> (LedgerService, Database, tempfile::TempDir) {
        let (db, dir) = test_db();
        (LedgerService::new(db.clone(), Arc::new(EventBus::new())), db, dir)
    }

    #[test]
    fn test_award_rejects_non_positive() {
        let (ledger, _db, _dir) = service();
        assert!(matches!(ledger.award_gold("alice", 0, "nothing", None), Err(CoreError::Validation(_))));
        assert!(matches!(ledger.award_gold("alice", -5, "negative", None), Err(CoreError::Validation(_))));
        assert_eq!(ledger.get_balance("alice").unwrap(), 0);
    }

    #[test]
    fn test_debit_requires_balance() {
        let (ledger, _db, _dir) = service();
        ledger.award_gold("alice", 50, "seed", None).unwrap();

        let err = ledger
            .record_transaction("alice", -80, TransactionType::Transfer, None, "too much", 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(ledger.get_balance("alice").unwrap(), 50);

        ledger
            .record_transaction("alice", -50, TransactionType::Transfer, None, "all of it", 0)
            .unwrap();
        assert_eq!(ledger.get_balance("alice").unwrap(), 0);
    }

    #[test]
    fn test_recompute_repairs_corrupted_cache() {
        let (ledger, db, _dir) = service();
        ledger.award_gold("alice", 100, "quest", None).unwrap();
        ledger.award_gold("alice", 25, "bonus", None).unwrap();

        db.with_write_tx(|conn| {
            conn.batch_execute("UPDATE user_balances SET gold_balance = 9999 WHERE user_id = 'alice'")?;
            Ok(())
        })
        .unwrap();

        let check = ledger.check_balance("alice").unwrap();
        assert!(!check.consistent);
        assert!(matches!(check.drift(), Some(CoreError::Consistency { cached: 9999, ledger: 125, .. })));

        assert_eq!(ledger.recompute_balance("alice").unwrap(), 125);
        assert_eq!(ledger.recompute_balance("alice").unwrap(), 125);
        assert!(ledger.check_balance("alice").unwrap().consistent);
    }

    #[test]
    fn test_recompute_all_counts_repairs() {
        let (ledger, db, _dir) = service();
        ledger.award_gold("alice", 10, "a", None).unwrap();
        ledger.award_gold("bob", 20, "b", None).unwrap();

        db.with_write_tx(|conn| {
            conn.batch_execute(
                "INSERT INTO user_balances (user_id, gold_balance, last_updated) \
                 VALUES ('ghost', 42, '2026-01-01T00:00:00.000Z'); \
                 UPDATE user_balances SET gold_balance = 0 WHERE user_id = 'bob';",
            )?;
            Ok(())
        })
        .unwrap();

        let report = ledger.recompute_all_balances().unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.repaired, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(ledger.get_balance("ghost").unwrap(), 0);
        assert_eq!(ledger.get_balance("bob").unwrap(), 20);
    }

    #[test]
    fn test_list_transactions_newest_first() {
        let (ledger, _db, _dir) = service();
        ledger.award_gold("alice", 1, "first", None).unwrap();
        ledger.award_gold("alice", 2, "second", None).unwrap();

        let txs = ledger.list_transactions("alice", 10).unwrap();
        assert_eq!(txs.len(), 2);
        assert!(txs[0].created_at >= txs[1].created_at);
        assert!(txs.iter().all(|t| t.transaction_type().unwrap() == TransactionType::Reward));
    }
}
