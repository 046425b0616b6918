//! Attempt service - application attempt limiting and attempt log repair

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::info;

use crate::db::models::{ApplicationAttempt, ApplicationStatus};
use crate::db::{applications, attempts, Database};
use crate::error::CoreError;

use super::RepairReport;

/// Attempt budget and eligibility for one (quest, user) pair
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct AttemptStatus {
    pub quest_id: String,
    pub user_id: String,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub remaining_attempts: i64,
    pub can_apply: bool,
    pub reason: String,
    pub last_status: Option<ApplicationStatus>,
}

/// Eligibility check inside the caller's connection or transaction
///
/// Order matters: a kick bars the user regardless of budget, an open
/// application blocks a parallel one, and only then is the budget checked.
pub(crate) fn eligibility(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
    max_attempts: i64,
) -> Result<(bool, String), CoreError> {
    let kicked = applications::count_for_pair_with_status(conn, quest_id, user_id, &[ApplicationStatus::Kicked])?;
    if kicked > 0 {
        return Ok((false, "You were removed from this quest and cannot apply again".into()));
    }

    let active = applications::count_for_pair_with_status(
        conn,
        quest_id,
        user_id,
        &[ApplicationStatus::Pending, ApplicationStatus::Approved],
    )?;
    if active > 0 {
        return Ok((false, "You already have an active application for this quest".into()));
    }

    let count = attempts::count_for_pair(conn, quest_id, user_id)?;
    if count >= max_attempts {
        return Ok((false, format!(
            "Maximum application attempts ({}) reached for this quest",
            max_attempts
        )));
    }

    Ok((true, format!("{} attempt(s) remaining", max_attempts - count)))
}

/// Status of the pair's most recent application
///
/// Follows the latest attempt's application so equal `applied_at` values
/// cannot reorder attempts.
fn last_status(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Option<ApplicationStatus>, CoreError> {
    let latest = match attempts::latest_for_pair(conn, quest_id, user_id)? {
        Some(attempt) => applications::get_application(conn, &attempt.application_id)?,
        None => applications::latest_for_pair(conn, quest_id, user_id)?,
    };
    latest.map(|app| app.status()).transpose()
}

/// Attempt service for business logic
pub struct AttemptService {
    db: Database,
    max_attempts: i64,
}

impl AttemptService {
    /// Create a new attempt service
    pub fn new(db: Database, max_attempts: i64) -> Self {
        Self { db, max_attempts }
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Whether the user may file another application, with a human-readable reason
    pub fn can_apply_again(&self, quest_id: &str, user_id: &str) -> Result<(bool, String), CoreError> {
        self.db.with_conn(|conn| eligibility(conn, quest_id, user_id, self.max_attempts))
    }

    pub fn get_attempt_count(&self, quest_id: &str, user_id: &str) -> Result<i64, CoreError> {
        self.db.with_conn(|conn| attempts::count_for_pair(conn, quest_id, user_id))
    }

    /// Attempt budget, eligibility and last outcome in one read
    pub fn check_attempts(&self, quest_id: &str, user_id: &str) -> Result<AttemptStatus, CoreError> {
        self.db.with_conn(|conn| {
            let attempt_count = attempts::count_for_pair(conn, quest_id, user_id)?;
            let (can_apply, reason) = eligibility(conn, quest_id, user_id, self.max_attempts)?;
            let last_status = last_status(conn, quest_id, user_id)?;

            Ok(AttemptStatus {
                quest_id: quest_id.to_string(),
                user_id: user_id.to_string(),
                attempt_count,
                max_attempts: self.max_attempts,
                remaining_attempts: (self.max_attempts - attempt_count).max(0),
                can_apply,
                reason,
                last_status,
            })
        })
    }

    /// Attempts for a pair in attempt order
    pub fn attempt_history(&self, quest_id: &str, user_id: &str) -> Result<Vec<ApplicationAttempt>, CoreError> {
        self.db.with_conn(|conn| attempts::list_for_pair(conn, quest_id, user_id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Log an attempt for an existing application
    ///
    /// Application creation already records its attempt; this is for
    /// applications that were written without one.
    pub fn record_attempt(
        &self,
        quest_id: &str,
        user_id: &str,
        application_id: &str,
    ) -> Result<ApplicationAttempt, CoreError> {
        self.db.with_write_tx(|conn| {
            let application = applications::require_application(conn, application_id)?;
            if application.quest_id != quest_id || application.applicant_id != user_id {
                return Err(CoreError::Validation(format!(
                    "application {} does not belong to quest {} and user {}",
                    application_id, quest_id, user_id
                )));
            }
            if attempts::get_for_application(conn, application_id)?.is_some() {
                return Err(CoreError::Validation(format!(
                    "attempt already recorded for application {}",
                    application_id
                )));
            }
            attempts::insert_next_attempt(conn, quest_id, user_id, application_id, None)
        })
    }

    /// Create missing attempt rows, numbered after existing ones in application order
    pub fn backfill_attempts(&self) -> Result<RepairReport, CoreError> {
        let missing = self.db.with_conn(applications::list_without_attempt)?;
        let mut report = RepairReport::default();

        for application in &missing {
            report.examined += 1;
            let result = self.db.with_write_tx(|conn| {
                // Another worker may have backfilled it since the scan.
                if attempts::get_for_application(conn, &application.id)?.is_some() {
                    return Ok(None);
                }
                attempts::insert_next_attempt(
                    conn,
                    &application.quest_id,
                    &application.applicant_id,
                    &application.id,
                    Some(&application.applied_at),
                )
                .map(Some)
            });

            match result {
                Ok(Some(attempt)) => {
                    report.repaired += 1;
                    info!(
                        application_id = %application.id,
                        attempt_number = attempt.attempt_number,
                        "Backfilled application attempt"
                    );
                }
                Ok(None) => {}
                Err(e) => report.record_failure(&application.id, &e),
            }
        }

        info!(examined = report.examined, repaired = report.repaired, failed = report.failed, "Attempt backfill finished");
        Ok(report)
    }
}
