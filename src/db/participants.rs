//! Quest membership, soft-deleted via the `dropped` status

use diesel::prelude::*;
use uuid::Uuid;

use super::diesel_schema::quest_participants;
use super::models::{current_timestamp, NewQuestParticipant, ParticipantStatus, QuestParticipant};
use crate::error::CoreError;

pub fn get_participant(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<Option<QuestParticipant>, CoreError> {
    quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .filter(quest_participants::user_id.eq(user_id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Every participant row for a quest, including dropped ones
pub fn list_for_quest(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<QuestParticipant>, CoreError> {
    quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .order(quest_participants::joined_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Active (non-dropped) participants, earliest joined first
pub fn list_active(
    conn: &mut SqliteConnection,
    quest_id: &str,
) -> Result<Vec<QuestParticipant>, CoreError> {
    quest_participants::table
        .filter(quest_participants::quest_id.eq(quest_id))
        .filter(quest_participants::status.eq_any(ParticipantStatus::ACTIVE))
        .order((quest_participants::joined_at.asc(), quest_participants::user_id.asc()))
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Create the membership row, or reactivate a dropped one, with status `joined`
pub fn join(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
) -> Result<QuestParticipant, CoreError> {
    let now = current_timestamp();

    match get_participant(conn, quest_id, user_id)? {
        Some(existing) => {
            diesel::update(quest_participants::table.filter(quest_participants::id.eq(&existing.id)))
                .set((
                    quest_participants::status.eq(ParticipantStatus::Joined.as_str()),
                    quest_participants::joined_at.eq(&now),
                    quest_participants::updated_at.eq(&now),
                ))
                .execute(conn)
                .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let new_participant = NewQuestParticipant {
                id: &id,
                quest_id,
                user_id,
                status: ParticipantStatus::Joined.as_str(),
                joined_at: &now,
                updated_at: &now,
            };
            diesel::insert_into(quest_participants::table)
                .values(&new_participant)
                .execute(conn)
                .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;
        }
    }

    get_participant(conn, quest_id, user_id)?
        .ok_or_else(|| CoreError::Internal("Failed to retrieve participant".into()))
}

/// Set one participant's status; returns false when no row exists
pub fn set_status(
    conn: &mut SqliteConnection,
    quest_id: &str,
    user_id: &str,
    status: ParticipantStatus,
) -> Result<bool, CoreError> {
    let changed = diesel::update(
        quest_participants::table
            .filter(quest_participants::quest_id.eq(quest_id))
            .filter(quest_participants::user_id.eq(user_id)),
    )
    .set((
        quest_participants::status.eq(status.as_str()),
        quest_participants::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)
    .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;

    Ok(changed > 0)
}

/// Move every active participant of a quest to `status`; returns rows changed
pub fn set_all_active(
    conn: &mut SqliteConnection,
    quest_id: &str,
    status: ParticipantStatus,
) -> Result<usize, CoreError> {
    diesel::update(
        quest_participants::table
            .filter(quest_participants::quest_id.eq(quest_id))
            .filter(quest_participants::status.eq_any(ParticipantStatus::ACTIVE)),
    )
    .set((
        quest_participants::status.eq(status.as_str()),
        quest_participants::updated_at.eq(current_timestamp()),
    ))
    .execute(conn)
    .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))
}
