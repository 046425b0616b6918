//! Application rows: one per attempt, reviewed in place

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::applications;
use super::models::{current_timestamp, Application, ApplicationStatus, NewApplication};
use crate::error::CoreError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_application(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Application>, CoreError> {
    applications::table
        .filter(applications::id.eq(id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

pub fn require_application(conn: &mut SqliteConnection, id: &str) -> Result<Application, CoreError> {
    get_application(conn, id)?.ok_or_else(|| CoreError::NotFound(format!("application {}", id)))
}

/// All applications for a quest, oldest first
pub fn list_for_quest(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<Application>, CoreError> {
    applications::table
        .filter(applications::quest_id.eq(quest_id))
        .order(applications::applied_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Most recent application of a user to a quest
pub fn latest_for_pair(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
) -> Result<Option<Application>, CoreError> {
    applications::table
        .filter(applications::quest_id.eq(quest_id))
        .filter(applications::applicant_id.eq(applicant_id))
        .order(applications::applied_at.desc())
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Count a pair's applications in the given statuses
pub fn count_for_pair_with_status(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
    statuses: &[ApplicationStatus],
) -> Result<i64, CoreError> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    applications::table
        .filter(applications::quest_id.eq(quest_id))
        .filter(applications::applicant_id.eq(applicant_id))
        .filter(applications::status.eq_any(statuses))
        .count()
        .get_result(conn)
        .map_err(|e| CoreError::Internal(format!("Count query failed: {}", e)))
}

/// Count a quest's applications in one status
pub fn count_for_quest_with_status(
    conn: &mut SqliteConnection,
    quest_id: &str,
    status: ApplicationStatus,
) -> Result<i64, CoreError> {
    applications::table
        .filter(applications::quest_id.eq(quest_id))
        .filter(applications::status.eq(status.as_str()))
        .count()
        .get_result(conn)
        .map_err(|e| CoreError::Internal(format!("Count query failed: {}", e)))
}

/// Approved application of a user for a quest, if any
pub fn approved_for_pair(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
) -> Result<Option<Application>, CoreError> {
    applications::table
        .filter(applications::quest_id.eq(quest_id))
        .filter(applications::applicant_id.eq(applicant_id))
        .filter(applications::status.eq(ApplicationStatus::Approved.as_str()))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Applications that have no attempt row (backfill input), oldest first
pub fn list_without_attempt(conn: &mut SqliteConnection) -> Result<Vec<Application>, CoreError> {
    use super::diesel_schema::application_attempts;

    applications::table
        .filter(diesel::dsl::not(applications::id.eq_any(
            application_attempts::table.select(application_attempts::application_id),
        )))
        .order(applications::applied_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_application(
    conn: &mut SqliteConnection,
    quest_id: &str,
    applicant_id: &str,
    message: Option<&str>,
) -> Result<Application, CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_application = NewApplication {
        id: &id,
        quest_id,
        applicant_id,
        status: ApplicationStatus::Pending.as_str(),
        message,
        applied_at: &now,
    };

    diesel::insert_into(applications::table)
        .values(&new_application)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;

    require_application(conn, &id)
}

/// Move an application from `from` to `to`, stamping the reviewer
///
/// The status guard is part of the UPDATE, so a concurrent transition that
/// already moved the row leaves zero rows changed and yields a state conflict.
pub fn transition(
    conn: &mut SqliteConnection,
    id: &str,
    from: ApplicationStatus,
    to: ApplicationStatus,
    reviewed_by: &str,
    kick_reason: Option<&str>,
) -> Result<Application, CoreError> {
    let changed = diesel::update(
        applications::table
            .filter(applications::id.eq(id))
            .filter(applications::status.eq(from.as_str())),
    )
    .set((
        applications::status.eq(to.as_str()),
        applications::reviewed_by.eq(reviewed_by),
        applications::reviewed_at.eq(current_timestamp()),
        applications::kick_reason.eq(kick_reason),
    ))
    .execute(conn)
    .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;

    let application = require_application(conn, id)?;
    if changed == 0 {
        return Err(CoreError::conflict("Application", id, from.as_str(), application.status));
    }
    Ok(application)
}

/// Reject pending applications for a quest, optionally sparing one; returns
/// the ids that were rejected
pub fn reject_pending(
    conn: &mut SqliteConnection,
    quest_id: &str,
    except_id: Option<&str>,
    reviewed_by: &str,
) -> Result<Vec<String>, CoreError> {
    let mut query = applications::table
        .filter(applications::quest_id.eq(quest_id))
        .filter(applications::status.eq(ApplicationStatus::Pending.as_str()))
        .select(applications::id)
        .into_boxed();

    if let Some(except_id) = except_id {
        query = query.filter(applications::id.ne(except_id));
    }

    let ids: Vec<String> = query
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))?;

    if ids.is_empty() {
        return Ok(ids);
    }

    diesel::update(applications::table.filter(applications::id.eq_any(&ids)))
        .set((
            applications::status.eq(ApplicationStatus::Rejected.as_str()),
            applications::reviewed_by.eq(reviewed_by),
            applications::reviewed_at.eq(current_timestamp()),
        ))
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::quests::{insert_quest, CreateQuestInput};
    use crate::db::test_db;

    fn quest(conn: &mut SqliteConnection) -> String {
        insert_quest(conn, &CreateQuestInput {
            creator_id: "creator".into(),
            title: "Guard the gate".into(),
            description: None,
            gold_reward: 0,
            commission_fee: 0,
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_transition_guards_source_state() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            let quest_id = quest(conn);
            let app = insert_application(conn, &quest_id, "alice", Some("pick me"))?;
            assert_eq!(app.status()?, ApplicationStatus::Pending);

            let approved = transition(
                conn, &app.id, ApplicationStatus::Pending, ApplicationStatus::Approved, "creator", None,
            )?;
            assert_eq!(approved.reviewed_by.as_deref(), Some("creator"));

            let err = transition(
                conn, &app.id, ApplicationStatus::Pending, ApplicationStatus::Rejected, "creator", None,
            )
            .unwrap_err();
            assert!(matches!(err, CoreError::StateConflict { .. }));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reject_pending_skips_reviewed_and_spared() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            let quest_id = quest(conn);
            let a = insert_application(conn, &quest_id, "alice", None)?;
            let b = insert_application(conn, &quest_id, "bob", None)?;
            let c = insert_application(conn, &quest_id, "carol", None)?;
            transition(conn, &c.id, ApplicationStatus::Pending, ApplicationStatus::Rejected, "creator", None)?;

            let rejected = reject_pending(conn, &quest_id, Some(&a.id), "creator")?;
            assert_eq!(rejected, vec![b.id.clone()]);
            assert_eq!(require_application(conn, &a.id)?.status()?, ApplicationStatus::Pending);
            assert_eq!(require_application(conn, &b.id)?.status()?, ApplicationStatus::Rejected);

            let rejected = reject_pending(conn, &quest_id, None, "creator")?;
            assert_eq!(rejected, vec![a.id.clone()]);
            assert_eq!(count_for_quest_with_status(conn, &quest_id, ApplicationStatus::Pending)?, 0);
            Ok(())
        })
        .unwrap();
    }
}
