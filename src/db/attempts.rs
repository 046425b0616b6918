//! Append-only application attempt log
//!
//! Attempt numbers are derived from prior attempt rows only, never from
//! application rows, so a pair's count cannot drift when applications are
//! created through more than one path.

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::application_attempts;
use super::models::{current_timestamp, ApplicationAttempt, NewApplicationAttempt};
use crate::error::CoreError;

/// Number of attempts recorded for a (quest, applicant) pair
pub fn count_for_pair(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
) -> Result<i64, CoreError> {
    application_attempts::table
        .filter(application_attempts::quest_id.eq(quest_id))
        .filter(application_attempts::applicant_id.eq(applicant_id))
        .count()
        .get_result(conn)
        .map_err(|e| CoreError::Internal(format!("Count query failed: {}", e)))
}

/// Attempts for a pair in attempt order
pub fn list_for_pair(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
) -> Result<Vec<ApplicationAttempt>, CoreError> {
    application_attempts::table
        .filter(application_attempts::quest_id.eq(quest_id))
        .filter(application_attempts::applicant_id.eq(applicant_id))
        .order((
            application_attempts::attempt_number.asc(),
            application_attempts::attempted_at.asc(),
        ))
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Latest attempt for a pair
pub fn latest_for_pair(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
) -> Result<Option<ApplicationAttempt>, CoreError> {
    application_attempts::table
        .filter(application_attempts::quest_id.eq(quest_id))
        .filter(application_attempts::applicant_id.eq(applicant_id))
        .order(application_attempts::attempt_number.desc())
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Attempt recorded for an application, if any
pub fn get_for_application(
    conn: &mut SqliteConnection,
    application_id: &str,
) -> Result<Option<ApplicationAttempt>, CoreError> {
    application_attempts::table
        .filter(application_attempts::application_id.eq(application_id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Append the next attempt for a pair
///
/// `attempted_at` defaults to now; backfill passes the application's own
/// timestamp. Must run inside the caller's write transaction so the count and
/// insert see the same snapshot.
pub fn insert_next_attempt(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
    application_id: &str,
    attempted_at: Option<&str>,
) -> Result<ApplicationAttempt, CoreError> {
    let attempt_number = count_for_pair(conn, quest_id, applicant_id)? + 1;
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_attempt = NewApplicationAttempt {
        id: &id,
        quest_id,
        applicant_id,
        attempt_number,
        application_id,
        attempted_at: attempted_at.unwrap_or(now.as_str()),
    };

    diesel::insert_into(application_attempts::table)
        .values(&new_attempt)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;

    application_attempts::table
        .filter(application_attempts::id.eq(&id))
        .first(conn)
        .map_err(|e| CoreError::Internal(format!("Failed to retrieve created attempt: {}", e)))
}
