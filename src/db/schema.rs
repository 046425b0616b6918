//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::CoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), CoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
pub fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, CoreError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| CoreError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row: Option<VersionRow> = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Failed to read schema_version: {}", e)))?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), CoreError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), CoreError> {
    conn.batch_execute(QUEST_SCHEMA)
        .map_err(|e| CoreError::Internal(format!("Failed to create quest tables: {}", e)))?;

    conn.batch_execute(LEDGER_SCHEMA)
        .map_err(|e| CoreError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| CoreError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), CoreError> {
    // No older versions exist yet; each future step upgrades from_version by one.
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Quests, applications, attempts and participants
const QUEST_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quests (
    id TEXT PRIMARY KEY NOT NULL,
    creator_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    gold_reward INTEGER NOT NULL DEFAULT 0 CHECK (gold_reward >= 0),
    commission_fee INTEGER NOT NULL DEFAULT 0 CHECK (commission_fee >= 0),
    -- Weak reference: cleared by reconciliation, no FK
    assigned_to TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

-- One row per attempt; uniqueness on (quest, applicant) is NOT enforced here
CREATE TABLE IF NOT EXISTS applications (
    id TEXT PRIMARY KEY NOT NULL,
    quest_id TEXT NOT NULL,
    applicant_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    message TEXT,
    reviewed_by TEXT,
    reviewed_at TEXT,
    kick_reason TEXT,
    applied_at TEXT NOT NULL,
    FOREIGN KEY (quest_id) REFERENCES quests(id)
);

CREATE TABLE IF NOT EXISTS application_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    quest_id TEXT NOT NULL,
    applicant_id TEXT NOT NULL,
    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
    application_id TEXT NOT NULL UNIQUE,
    attempted_at TEXT NOT NULL,
    UNIQUE (quest_id, applicant_id, attempt_number),
    FOREIGN KEY (quest_id) REFERENCES quests(id),
    FOREIGN KEY (application_id) REFERENCES applications(id)
);

CREATE TABLE IF NOT EXISTS quest_participants (
    id TEXT PRIMARY KEY NOT NULL,
    quest_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'joined',
    joined_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (quest_id, user_id),
    FOREIGN KEY (quest_id) REFERENCES quests(id)
);
"#;

/// Transactions, balance cache and payment proofs
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    quest_id TEXT,
    payment_proof_id TEXT,
    commission_fee INTEGER NOT NULL DEFAULT 0,
    base_amount INTEGER NOT NULL DEFAULT 0,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

-- Derived cache; must equal SUM(transactions.amount) per user
CREATE TABLE IF NOT EXISTS user_balances (
    user_id TEXT PRIMARY KEY NOT NULL,
    gold_balance INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payment_proofs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    payment_reference TEXT NOT NULL UNIQUE,
    package_gold INTEGER NOT NULL CHECK (package_gold > 0),
    status TEXT NOT NULL DEFAULT 'queued',
    gold_awarded INTEGER NOT NULL DEFAULT 0,
    reviewed_by TEXT,
    reviewed_at TEXT,
    rejection_reason TEXT,
    submitted_at TEXT NOT NULL,
    awarded_at TEXT
);

-- Ledger rows are never rewritten
CREATE TRIGGER IF NOT EXISTS transactions_no_update
BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transactions_no_delete
BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_quests_status ON quests(status);
CREATE INDEX IF NOT EXISTS idx_applications_quest ON applications(quest_id, status);
CREATE INDEX IF NOT EXISTS idx_applications_applicant ON applications(quest_id, applicant_id);
CREATE INDEX IF NOT EXISTS idx_attempts_pair ON application_attempts(quest_id, applicant_id);
CREATE INDEX IF NOT EXISTS idx_participants_quest ON quest_participants(quest_id, status);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_transactions_quest ON transactions(quest_id);
CREATE INDEX IF NOT EXISTS idx_transactions_payment ON transactions(payment_proof_id);
CREATE INDEX IF NOT EXISTS idx_payment_proofs_status ON payment_proofs(status);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:")
            .expect("Failed to create in-memory database");

        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);

        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_transactions_reject_updates() {
        let mut conn = SqliteConnection::establish(":memory:")
            .expect("Failed to create in-memory database");
        init_schema(&mut conn).unwrap();

        conn.batch_execute(
            "INSERT INTO transactions (id, user_id, amount, transaction_type, created_at) \
             VALUES ('t1', 'u1', 10, 'REWARD', '2026-01-01T00:00:00.000Z')",
        )
        .unwrap();

        assert!(conn.batch_execute("UPDATE transactions SET amount = 99 WHERE id = 't1'").is_err());
        assert!(conn.batch_execute("DELETE FROM transactions WHERE id = 't1'").is_err());
    }
}
