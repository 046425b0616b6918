//! Application service - the application review state machine
//!
//! ```text
//! pending ──approve──▶ approved ──kick──▶ kicked
//!    │
//!    └──reject──▶ rejected
//! ```
//!
//! Each transition and all of its side effects (competing applications,
//! participant rows, quest status) commit in one write transaction. Events go
//! out after the commit.

use std::sync::Arc;

use tracing::info;

use crate::db::models::{Application, ApplicationStatus, ParticipantStatus, QuestStatus};
use crate::db::{applications, attempts, participants, quests, Database};
use crate::error::CoreError;

use super::attempt_service::eligibility;
use super::events::{CoreEvent, EventBus};
use super::quest_service::reconcile_in;

const MAX_MESSAGE_LEN: usize = 2000;

/// Application service for business logic
pub struct ApplicationService {
    db: Database,
    events: Arc<EventBus>,
    max_attempts: i64,
}

impl ApplicationService {
    /// Create a new application service
    pub fn new(db: Database, events: Arc<EventBus>, max_attempts: i64) -> Self {
        Self { db, events, max_attempts }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<Application>, CoreError> {
        self.db.with_conn(|conn| applications::get_application(conn, id))
    }

    /// All applications for a quest, oldest first
    pub fn list_for_quest(&self, quest_id: &str) -> Result<Vec<Application>, CoreError> {
        self.db.with_conn(|conn| applications::list_for_quest(conn, quest_id))
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// File a new pending application and log its attempt
    pub fn create(
        &self,
        quest_id: &str,
        applicant_id: &str,
        message: Option<&str>,
    ) -> Result<Application, CoreError> {
        if applicant_id.is_empty() {
            return Err(CoreError::Validation("applicant_id is required".into()));
        }
        if message.map_or(false, |m| m.chars().count() > MAX_MESSAGE_LEN) {
            return Err(CoreError::Validation(format!(
                "message must be <= {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        let (application, attempt_number) = self.db.with_write_tx(|conn| {
            let quest = quests::require_quest(conn, quest_id)?;
            let status = quest.status()?;
            if !status.accepts_applications() {
                return Err(CoreError::Validation(format!(
                    "quest {} is {} and not accepting applications",
                    quest_id, status
                )));
            }
            if quest.creator_id == applicant_id {
                return Err(CoreError::Validation("cannot apply to your own quest".into()));
            }

            let (allowed, reason) = eligibility(conn, quest_id, applicant_id, self.max_attempts)?;
            if !allowed {
                return Err(CoreError::Validation(reason));
            }

            let application = applications::insert_application(conn, quest_id, applicant_id, message)?;
            let attempt = attempts::insert_next_attempt(conn, quest_id, applicant_id, &application.id, None)?;
            Ok((application, attempt.attempt_number))
        })?;

        info!(
            application_id = %application.id,
            quest_id = %quest_id,
            applicant_id = %applicant_id,
            attempt_number,
            "Application created"
        );
        self.events.emit(CoreEvent::ApplicationCreated {
            id: application.id.clone(),
            quest_id: application.quest_id.clone(),
            applicant_id: application.applicant_id.clone(),
            attempt_number,
        });

        Ok(application)
    }

    /// pending → approved; rejects competitors and seats the applicant
    pub fn approve(&self, application_id: &str, reviewer: &str) -> Result<Application, CoreError> {
        let (application, auto_rejected, outcome) = self.db.with_write_tx(|conn| {
            let current = applications::require_application(conn, application_id)?;
            let quest = quests::require_quest(conn, &current.quest_id)?;
            let quest_status = quest.status()?;
            if quest_status.is_terminal() {
                return Err(CoreError::Validation(format!(
                    "quest {} is {}",
                    quest.id, quest_status
                )));
            }

            let application = applications::transition(
                conn,
                application_id,
                ApplicationStatus::Pending,
                ApplicationStatus::Approved,
                reviewer,
                None,
            )?;

            let auto_rejected = applications::reject_pending(conn, &quest.id, Some(application_id), reviewer)?;
            let mut rejected = Vec::with_capacity(auto_rejected.len());
            for id in &auto_rejected {
                rejected.push(applications::require_application(conn, id)?);
            }

            participants::join(conn, &quest.id, &application.applicant_id)?;
            quests::set_assigned_to(conn, &quest.id, Some(&application.applicant_id))?;
            if matches!(quest_status, QuestStatus::Open | QuestStatus::Assigned) {
                quests::set_status(conn, &quest.id, QuestStatus::InProgress)?;
            }

            let outcome = reconcile_in(conn, &quest.id)?;
            Ok((application, rejected, outcome))
        })?;

        info!(
            application_id = %application.id,
            quest_id = %application.quest_id,
            reviewer = %reviewer,
            auto_rejected = auto_rejected.len(),
            "Application approved"
        );

        let mut events = vec![CoreEvent::ApplicationApproved {
            id: application.id.clone(),
            quest_id: application.quest_id.clone(),
            applicant_id: application.applicant_id.clone(),
            reviewed_by: reviewer.to_string(),
        }];
        events.extend(auto_rejected.iter().map(|rejected| CoreEvent::ApplicationRejected {
            id: rejected.id.clone(),
            quest_id: rejected.quest_id.clone(),
            applicant_id: rejected.applicant_id.clone(),
            reviewed_by: reviewer.to_string(),
        }));
        events.extend(outcome.event());
        self.events.emit_all(events);

        Ok(application)
    }

    /// pending → rejected
    pub fn reject(&self, application_id: &str, reviewer: &str) -> Result<Application, CoreError> {
        let application = self.db.with_write_tx(|conn| {
            applications::require_application(conn, application_id)?;
            applications::transition(
                conn,
                application_id,
                ApplicationStatus::Pending,
                ApplicationStatus::Rejected,
                reviewer,
                None,
            )
        })?;

        info!(application_id = %application.id, reviewer = %reviewer, "Application rejected");
        self.events.emit(CoreEvent::ApplicationRejected {
            id: application.id.clone(),
            quest_id: application.quest_id.clone(),
            applicant_id: application.applicant_id.clone(),
            reviewed_by: reviewer.to_string(),
        });

        Ok(application)
    }

    /// approved → kicked; the participant row is dropped, both rows are kept
    pub fn kick(
        &self,
        application_id: &str,
        kicker: &str,
        reason: Option<&str>,
    ) -> Result<Application, CoreError> {
        let (application, outcome) = self.db.with_write_tx(|conn| {
            let current = applications::require_application(conn, application_id)?;
            let quest = quests::require_quest(conn, &current.quest_id)?;
            let quest_status = quest.status()?;
            if quest_status.is_terminal() {
                return Err(CoreError::Validation(format!(
                    "quest {} is {}",
                    quest.id, quest_status
                )));
            }

            let application = applications::transition(
                conn,
                application_id,
                ApplicationStatus::Approved,
                ApplicationStatus::Kicked,
                kicker,
                reason,
            )?;

            participants::set_status(
                conn,
                &application.quest_id,
                &application.applicant_id,
                ParticipantStatus::Dropped,
            )?;

            let outcome = reconcile_in(conn, &application.quest_id)?;
            Ok((application, outcome))
        })?;

        info!(
            application_id = %application.id,
            quest_id = %application.quest_id,
            kicked_by = %kicker,
            "Application kicked"
        );
        self.events.emit(CoreEvent::ApplicationKicked {
            id: application.id.clone(),
            quest_id: application.quest_id.clone(),
            applicant_id: application.applicant_id.clone(),
            kicked_by: kicker.to_string(),
            reason: application.kick_reason.clone(),
        });
        if let Some(event) = outcome.event() {
            self.events.emit(event);
        }

        Ok(application)
    }
}
