//! Gold ledger: append-only transactions plus the cached balance row
//!
//! Nothing in this module updates or deletes a transaction. The balance cache
//! is changed only by `apply_to_balance` (same transaction as the insert) and
//! overwritten only by `overwrite_balance` (repair).

use std::collections::BTreeSet;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use serde::Serialize;
use uuid::Uuid;

use super::diesel_schema::{transactions, user_balances};
use super::models::{current_timestamp, NewTransaction, Transaction, TransactionType, UserBalance};
use crate::error::CoreError;

/// Ledger entry to append
#[derive(Debug, Clone)]
pub struct LedgerEntry<'a> {
    pub user_id: &'a str,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub quest_id: Option<&'a str>,
    pub payment_proof_id: Option<&'a str>,
    pub commission_fee: i64,
    pub description: &'a str,
}

impl LedgerEntry<'_> {
    /// Amount net of the commission, carrying the amount's sign
    pub fn base_amount(&self) -> i64 {
        if self.amount >= 0 {
            self.amount - self.commission_fee
        } else {
            self.amount + self.commission_fee
        }
    }
}

/// Aggregated ledger figures for one user
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub user_id: String,
    pub transaction_count: i64,
    pub ledger_sum: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_transaction(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Transaction>, CoreError> {
    transactions::table
        .filter(transactions::id.eq(id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Newest first
pub fn list_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Transaction>, CoreError> {
    transactions::table
        .filter(transactions::user_id.eq(user_id))
        .order(transactions::created_at.desc())
        .limit(limit)
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

pub fn list_for_quest(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<Transaction>, CoreError> {
    transactions::table
        .filter(transactions::quest_id.eq(quest_id))
        .order(transactions::created_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

pub fn list_for_payment_proof(
    conn: &mut SqliteConnection,
    payment_proof_id: &str,
) -> Result<Vec<Transaction>, CoreError> {
    transactions::table
        .filter(transactions::payment_proof_id.eq(payment_proof_id))
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

#[derive(QueryableByName)]
struct LedgerTotals {
    #[diesel(sql_type = BigInt)]
    transaction_count: i64,
    #[diesel(sql_type = BigInt)]
    ledger_sum: i64,
}

/// Sum of every transaction amount for a user
///
/// Summed by SQLite, which fails the query on integer overflow.
pub fn ledger_summary(conn: &mut SqliteConnection, user_id: &str) -> Result<LedgerSummary, CoreError> {
    let totals: LedgerTotals = diesel::sql_query(
        "SELECT COUNT(*) AS transaction_count, COALESCE(SUM(amount), 0) AS ledger_sum \
         FROM transactions WHERE user_id = ?",
    )
    .bind::<Text, _>(user_id)
    .get_result(conn)
    .map_err(|e| CoreError::Internal(format!("Ledger sum failed: {}", e)))?;

    Ok(LedgerSummary {
        user_id: user_id.to_string(),
        transaction_count: totals.transaction_count,
        ledger_sum: totals.ledger_sum,
    })
}

pub fn get_balance_row(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<UserBalance>, CoreError> {
    user_balances::table
        .filter(user_balances::user_id.eq(user_id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Cached balance, 0 when the user has no balance row yet
pub fn cached_balance(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, CoreError> {
    Ok(get_balance_row(conn, user_id)?.map(|b| b.gold_balance).unwrap_or(0))
}

/// Every user known to the ledger or the balance cache
pub fn all_user_ids(conn: &mut SqliteConnection) -> Result<Vec<String>, CoreError> {
    let from_ledger: Vec<String> = transactions::table
        .select(transactions::user_id)
        .distinct()
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))?;

    let from_cache: Vec<String> = user_balances::table
        .select(user_balances::user_id)
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))?;

    let ids: BTreeSet<String> = from_ledger.into_iter().chain(from_cache).collect();
    Ok(ids.into_iter().collect())
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append a transaction and apply it to the balance cache
///
/// Not transactional by itself: callers run it inside a write transaction so
/// the insert and the balance change commit together.
pub fn append(conn: &mut SqliteConnection, entry: &LedgerEntry<'_>) -> Result<Transaction, CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_transaction = NewTransaction {
        id: &id,
        user_id: entry.user_id,
        amount: entry.amount,
        transaction_type: entry.transaction_type.as_str(),
        quest_id: entry.quest_id,
        payment_proof_id: entry.payment_proof_id,
        commission_fee: entry.commission_fee,
        base_amount: entry.base_amount(),
        description: entry.description,
        created_at: &now,
    };

    diesel::insert_into(transactions::table)
        .values(&new_transaction)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;

    apply_to_balance(conn, entry.user_id, entry.amount)?;

    get_transaction(conn, &id)?
        .ok_or_else(|| CoreError::Internal("Failed to retrieve created transaction".into()))
}

/// Add `delta` to the cached balance, creating the row if missing
pub fn apply_to_balance(conn: &mut SqliteConnection, user_id: &str, delta: i64) -> Result<i64, CoreError> {
    let now = current_timestamp();

    diesel::insert_into(user_balances::table)
        .values(&UserBalance {
            user_id: user_id.to_string(),
            gold_balance: delta,
            last_updated: now.clone(),
        })
        .on_conflict(user_balances::user_id)
        .do_update()
        .set((
            user_balances::gold_balance.eq(user_balances::gold_balance + delta),
            user_balances::last_updated.eq(&now),
        ))
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Balance update failed: {}", e)))?;

    cached_balance(conn, user_id)
}

/// Replace the cached balance (repair only)
pub fn overwrite_balance(conn: &mut SqliteConnection, user_id: &str, balance: i64) -> Result<(), CoreError> {
    let now = current_timestamp();

    diesel::insert_into(user_balances::table)
        .values(&UserBalance {
            user_id: user_id.to_string(),
            gold_balance: balance,
            last_updated: now.clone(),
        })
        .on_conflict(user_balances::user_id)
        .do_update()
        .set((
            user_balances::gold_balance.eq(balance),
            user_balances::last_updated.eq(&now),
        ))
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Balance overwrite failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn reward<'a>(user_id: &'a str, amount: i64) -> LedgerEntry<'a> {
        LedgerEntry {
            user_id,
            amount,
            transaction_type: TransactionType::Reward,
            quest_id: None,
            payment_proof_id: None,
            commission_fee: 0,
            description: "test reward",
        }
    }

    #[test]
    fn test_append_updates_cache() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            append(conn, &reward("alice", 100))?;
            append(conn, &reward("alice", -30))?;
            append(conn, &reward("bob", 5))?;

            assert_eq!(cached_balance(conn, "alice")?, 70);
            assert_eq!(ledger_summary(conn, "alice")?.ledger_sum, 70);
            assert_eq!(ledger_summary(conn, "alice")?.transaction_count, 2);
            assert_eq!(cached_balance(conn, "carol")?, 0);
            assert_eq!(all_user_ids(conn)?, vec!["alice".to_string(), "bob".to_string()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ledger_sum_overflow_is_an_error() {
        use diesel::connection::SimpleConnection;

        let (db, _dir) = test_db();
        let result = db.with_write_tx(|conn| {
            conn.batch_execute(
                "INSERT INTO transactions (id, user_id, amount, transaction_type, created_at) VALUES \
                 ('t1', 'alice', 9223372036854775807, 'REWARD', '2026-01-01T00:00:00.000Z'), \
                 ('t2', 'alice', 1, 'REWARD', '2026-01-01T00:00:00.001Z')",
            )?;
            ledger_summary(conn, "alice")
        });
        assert!(matches!(result, Err(CoreError::Internal(_))));

        let empty = db.with_conn(|conn| ledger_summary(conn, "nobody")).unwrap();
        assert_eq!(empty.transaction_count, 0);
        assert_eq!(empty.ledger_sum, 0);
    }

    #[test]
    fn test_base_amount_nets_commission() {
        let credit = LedgerEntry { commission_fee: 10, ..reward("alice", 100) };
        assert_eq!(credit.base_amount(), 90);
        let debit = LedgerEntry { commission_fee: 10, ..reward("alice", -110) };
        assert_eq!(debit.base_amount(), -100);
    }

    #[test]
    fn test_overwrite_balance() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            append(conn, &reward("alice", 40))?;
            overwrite_balance(conn, "alice", 999)?;
            assert_eq!(cached_balance(conn, "alice")?, 999);
            overwrite_balance(conn, "alice", 40)?;
            assert_eq!(cached_balance(conn, "alice")?, 40);
            Ok(())
        })
        .unwrap();
    }
}
