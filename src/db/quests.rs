//! Quest queries and in-place status updates

use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::diesel_schema::quests;
use super::models::{current_timestamp, NewQuest, Quest, QuestStatus};
use crate::error::CoreError;

/// Input for creating a quest
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestInput {
    pub creator_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub gold_reward: i64,
    #[serde(default)]
    pub commission_fee: i64,
}

/// Query parameters for listing quests
#[derive(Debug, Clone, Deserialize)]
pub struct QuestQuery {
    pub status: Option<QuestStatus>,
    pub creator_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 { 100 }

impl Default for QuestQuery {
    fn default() -> Self {
        Self {
            status: None,
            creator_id: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_quest(conn: &mut SqliteConnection, id: &str) -> Result<Option<Quest>, CoreError> {
    quests::table
        .filter(quests::id.eq(id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Get a quest or fail with `NotFound`
pub fn require_quest(conn: &mut SqliteConnection, id: &str) -> Result<Quest, CoreError> {
    get_quest(conn, id)?.ok_or_else(|| CoreError::NotFound(format!("quest {}", id)))
}

pub fn list_quests(conn: &mut SqliteConnection, query: &QuestQuery) -> Result<Vec<Quest>, CoreError> {
    let mut base_query = quests::table.into_boxed();

    if let Some(status) = query.status {
        base_query = base_query.filter(quests::status.eq(status.as_str()));
    }

    if let Some(ref creator_id) = query.creator_id {
        base_query = base_query.filter(quests::creator_id.eq(creator_id));
    }

    base_query
        .order(quests::created_at.desc())
        .limit(query.limit)
        .offset(query.offset)
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Every quest id, oldest first (batch sweeps)
pub fn all_quest_ids(conn: &mut SqliteConnection) -> Result<Vec<String>, CoreError> {
    quests::table
        .select(quests::id)
        .order(quests::created_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_quest(conn: &mut SqliteConnection, input: &CreateQuestInput) -> Result<Quest, CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_quest = NewQuest {
        id: &id,
        creator_id: &input.creator_id,
        title: &input.title,
        description: input.description.as_deref(),
        status: QuestStatus::Open.as_str(),
        gold_reward: input.gold_reward,
        commission_fee: input.commission_fee,
        created_at: &now,
        updated_at: &now,
    };

    diesel::insert_into(quests::table)
        .values(&new_quest)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;

    require_quest(conn, &id)
}

pub fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: QuestStatus,
) -> Result<(), CoreError> {
    let now = current_timestamp();
    let completed_at = (status == QuestStatus::Completed).then(|| now.clone());

    diesel::update(quests::table.filter(quests::id.eq(id)))
        .set((
            quests::status.eq(status.as_str()),
            quests::updated_at.eq(&now),
        ))
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;

    if let Some(ts) = completed_at {
        diesel::update(quests::table.filter(quests::id.eq(id)))
            .set(quests::completed_at.eq(ts))
            .execute(conn)
            .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;
    }

    Ok(())
}

pub fn set_assigned_to(
    conn: &mut SqliteConnection,
    id: &str,
    assigned_to: Option<&str>,
) -> Result<(), CoreError> {
    diesel::update(quests::table.filter(quests::id.eq(id)))
        .set((
            quests::assigned_to.eq(assigned_to),
            quests::updated_at.eq(current_timestamp()),
        ))
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;
    Ok(())
}
