//! SQLite database module for quests, applications and the gold ledger
//!
//! ## Architecture
//!
//! - One SQLite file shared by every worker (threads of one process, or several
//!   processes pointed at the same file)
//! - Diesel repositories in this module take `&mut SqliteConnection` and never
//!   open transactions of their own unless documented
//! - Services open one `BEGIN IMMEDIATE` transaction per operation, so the write
//!   lock is held from the first read of a check-then-write sequence
//!
//! ## Tables
//!
//! - `quests` - Quest rows, status, escrowed reward and fee
//! - `applications` - One row per application attempt
//! - `application_attempts` - Append-only attempt log driving the attempt limit
//! - `quest_participants` - Membership, soft-deleted via `dropped`
//! - `transactions` - Append-only gold ledger
//! - `user_balances` - Cached per-user balance derived from the ledger
//! - `payment_proofs` - Manually reviewed receipts with an "awarded" guard flag

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod quests;
pub mod applications;
pub mod attempts;
pub mod participants;
pub mod transactions;
pub mod payment_proofs;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CoreError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas applied when the pool opens a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open or create the database described by `config`
    pub fn open(config: &Config) -> Result<Self, CoreError> {
        let db_path = &config.database_path;
        info!("Opening SQLite database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = db_path
            .to_str()
            .ok_or_else(|| CoreError::Config(format!("Database path is not UTF-8: {:?}", db_path)))?;

        // Journal mode and schema are set up once, before any pooled connection
        // exists, so pool workers never race on them.
        Self::bootstrap(url, config.busy_timeout_ms)?;

        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(config.busy_timeout_ms.max(1000) * 2))
            .connection_customizer(Box::new(ConnectionPragmas {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)
            .map_err(|e| CoreError::Pool(format!("Failed to build pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open a database file with default settings
    pub fn open_path(path: &Path) -> Result<Self, CoreError> {
        Self::open(&Config::with_database(path))
    }

    fn bootstrap(url: &str, busy_timeout_ms: u64) -> Result<(), CoreError> {
        let mut conn = SqliteConnection::establish(url)
            .map_err(|e| CoreError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
            busy_timeout_ms
        ))
        .map_err(|e| CoreError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&mut conn)?;
        debug!("Database bootstrap complete");
        Ok(())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, CoreError> {
        self.pool
            .get()
            .map_err(|e| CoreError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run a read-only closure on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, CoreError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run a closure inside `BEGIN IMMEDIATE ... COMMIT`
    ///
    /// The write lock is taken before the closure runs; any `Err` rolls every
    /// statement back.
    pub fn with_write_tx<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, CoreError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Row counts for diagnostics
    pub fn stats(&self) -> Result<DbStats, CoreError> {
        use diesel_schema::{applications, payment_proofs, quests, transactions};

        self.with_conn(|conn| {
            Ok(DbStats {
                quest_count: quests::table.count().get_result::<i64>(conn)? as u64,
                application_count: applications::table.count().get_result::<i64>(conn)? as u64,
                transaction_count: transactions::table.count().get_result::<i64>(conn)? as u64,
                payment_proof_count: payment_proofs::table.count().get_result::<i64>(conn)? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub quest_count: u64,
    pub application_count: u64,
    pub transaction_count: u64,
    pub payment_proof_count: u64,
}

/// Temp-file database shared by unit tests
#[cfg(test)]
pub(crate) fn test_db() -> (Database, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let db = Database::open_path(&dir.path().join("test.db")).expect("open test db");
    (db, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let (db, _dir) = test_db();
        let stats = db.stats().unwrap();
        assert_eq!(stats.quest_count, 0);
        assert_eq!(stats.transaction_count, 0);
    }

    #[test]
    fn test_write_tx_rolls_back_on_error() {
        let (db, _dir) = test_db();

        let result: Result<(), CoreError> = db.with_write_tx(|conn| {
            conn.batch_execute(
                "INSERT INTO user_balances (user_id, gold_balance, last_updated) \
                 VALUES ('u1', 5, '2026-01-01T00:00:00.000Z')",
            )?;
            Err(CoreError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(diesel_schema::user_balances::table.count().get_result(conn)?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pq.db");
        {
            let db = Database::open_path(&path).unwrap();
            db.with_write_tx(|conn| {
                conn.batch_execute(
                    "INSERT INTO user_balances (user_id, gold_balance, last_updated) \
                     VALUES ('u1', 5, '2026-01-01T00:00:00.000Z')",
                )?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open_path(&path).unwrap();
        let count: i64 = db
            .with_conn(|conn| Ok(diesel_schema::user_balances::table.count().get_result(conn)?))
            .unwrap();
        assert_eq!(count, 1);
    }
}
