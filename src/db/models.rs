//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//! - Status enums: rows store the `as_str` form, services work with the enum
//!
//! With the `typescript` feature, API-facing rows derive `ts_rs::TS`. Run:
//!   cargo test --features typescript export_bindings
//! Generated files go to: bindings/

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;
use crate::error::CoreError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Current UTC timestamp as ISO 8601 with milliseconds, so TEXT order is time order
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ============================================================================
// Status Enums
// ============================================================================

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
        #[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::Internal(format!(
                        "Unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Quest status; `Completed` and `Deleted` are terminal
    QuestStatus {
        Open => "open",
        Assigned => "assigned",
        InProgress => "in-progress",
        Completed => "completed",
        Deleted => "deleted",
    }
);

impl QuestStatus {
    /// Terminal quests are never touched by reconciliation
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestStatus::Completed | QuestStatus::Deleted)
    }

    /// Whether new applications may be filed
    pub fn accepts_applications(&self) -> bool {
        !self.is_terminal()
    }
}

string_enum!(
    /// Application review state
    ///
    /// `Rejected` and `Kicked` are both terminal for the row but differ for
    /// re-application: a kick bars the user from the quest for good.
    ApplicationStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Kicked => "kicked",
    }
);

impl ApplicationStatus {
    /// Pending and approved applications block a new attempt
    pub fn is_active(&self) -> bool {
        matches!(self, ApplicationStatus::Pending | ApplicationStatus::Approved)
    }
}

string_enum!(
    ParticipantStatus {
        Joined => "joined",
        InProgress => "in_progress",
        Completed => "completed",
        Dropped => "dropped",
    }
);

impl ParticipantStatus {
    /// Statuses counted as holding the quest
    pub const ACTIVE: [&'static str; 3] = ["joined", "in_progress", "completed"];

    pub fn is_active(&self) -> bool {
        !matches!(self, ParticipantStatus::Dropped)
    }
}

string_enum!(
    TransactionType {
        Purchase => "PURCHASE",
        Reward => "REWARD",
        Transfer => "TRANSFER",
        Refund => "REFUND",
    }
);

string_enum!(
    PaymentStatus {
        Queued => "queued",
        Processing => "processing",
        Verified => "verified",
        Rejected => "rejected",
    }
);

impl PaymentStatus {
    /// Statuses still waiting on a review decision
    pub const REVIEWABLE: [PaymentStatus; 2] = [PaymentStatus::Queued, PaymentStatus::Processing];
}

// ============================================================================
// Quest Models
// ============================================================================

/// Quest row from SELECT query
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = quests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct Quest {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub gold_reward: i64,
    pub commission_fee: i64,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Quest {
    pub fn status(&self) -> Result<QuestStatus, CoreError> {
        self.status.parse()
    }
}

/// New quest for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quests)]
pub struct NewQuest<'a> {
    pub id: &'a str,
    pub creator_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: &'a str,
    pub gold_reward: i64,
    pub commission_fee: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Application Models
// ============================================================================

/// Application row from SELECT query
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = applications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct Application {
    pub id: String,
    pub quest_id: String,
    pub applicant_id: String,
    pub status: String,
    pub message: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub kick_reason: Option<String>,
    pub applied_at: String,
}

impl Application {
    pub fn status(&self) -> Result<ApplicationStatus, CoreError> {
        self.status.parse()
    }
}

/// New application for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = applications)]
pub struct NewApplication<'a> {
    pub id: &'a str,
    pub quest_id: &'a str,
    pub applicant_id: &'a str,
    pub status: &'a str,
    pub message: Option<&'a str>,
    pub applied_at: &'a str,
}

/// Application attempt row (append-only)
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = application_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct ApplicationAttempt {
    pub id: String,
    pub quest_id: String,
    pub applicant_id: String,
    pub attempt_number: i64,
    pub application_id: String,
    pub attempted_at: String,
}

/// New attempt for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = application_attempts)]
pub struct NewApplicationAttempt<'a> {
    pub id: &'a str,
    pub quest_id: &'a str,
    pub applicant_id: &'a str,
    pub attempt_number: i64,
    pub application_id: &'a str,
    pub attempted_at: &'a str,
}

// ============================================================================
// Participant Models
// ============================================================================

/// Quest participant row
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = quest_participants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct QuestParticipant {
    pub id: String,
    pub quest_id: String,
    pub user_id: String,
    pub status: String,
    pub joined_at: String,
    pub updated_at: String,
}

impl QuestParticipant {
    pub fn status(&self) -> Result<ParticipantStatus, CoreError> {
        self.status.parse()
    }
}

/// New participant for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quest_participants)]
pub struct NewQuestParticipant<'a> {
    pub id: &'a str,
    pub quest_id: &'a str,
    pub user_id: &'a str,
    pub status: &'a str,
    pub joined_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Ledger Models
// ============================================================================

/// Ledger entry (append-only)
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub transaction_type: String,
    pub quest_id: Option<String>,
    pub payment_proof_id: Option<String>,
    pub commission_fee: i64,
    pub base_amount: i64,
    pub description: String,
    pub created_at: String,
}

impl Transaction {
    pub fn transaction_type(&self) -> Result<TransactionType, CoreError> {
        self.transaction_type.parse()
    }
}

/// New ledger entry for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub amount: i64,
    pub transaction_type: &'a str,
    pub quest_id: Option<&'a str>,
    pub payment_proof_id: Option<&'a str>,
    pub commission_fee: i64,
    pub base_amount: i64,
    pub description: &'a str,
    pub created_at: &'a str,
}

/// Cached balance row
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = user_balances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct UserBalance {
    pub user_id: String,
    pub gold_balance: i64,
    pub last_updated: String,
}

// ============================================================================
// Payment Proof Models
// ============================================================================

/// Payment proof row
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = payment_proofs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct PaymentProof {
    pub id: String,
    pub user_id: String,
    pub payment_reference: String,
    pub package_gold: i64,
    pub status: String,
    pub gold_awarded: i32,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub submitted_at: String,
    pub awarded_at: Option<String>,
}

impl PaymentProof {
    pub fn status(&self) -> Result<PaymentStatus, CoreError> {
        self.status.parse()
    }

    pub fn is_awarded(&self) -> bool {
        self.gold_awarded != 0
    }
}

/// New payment proof for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payment_proofs)]
pub struct NewPaymentProof<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub payment_reference: &'a str,
    pub package_gold: i64,
    pub status: &'a str,
    pub gold_awarded: i32,
    pub submitted_at: &'a str,
}
