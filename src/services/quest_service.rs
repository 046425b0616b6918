//! Quest service - escrow, completion, deletion and status reconciliation
//!
//! Quest status is derived state: after any change to applications or
//! participants, `reconcile_in` brings the quest row back in line with them.

use std::sync::Arc;

use diesel::SqliteConnection;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::{ApplicationStatus, ParticipantStatus, Quest, QuestStatus, TransactionType};
use crate::db::quests::{self, CreateQuestInput, QuestQuery};
use crate::db::transactions::LedgerEntry;
use crate::db::{applications, participants, Database};
use crate::error::CoreError;

use super::events::{CoreEvent, EventBus};
use super::ledger_service::record_in;
use super::RepairReport;

/// Result of reconciling one quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct ReconcileOutcome {
    pub quest_id: String,
    pub previous_status: QuestStatus,
    pub status: QuestStatus,
    pub assigned_to: Option<String>,
    pub assignment_cleared: bool,
    pub changed: bool,
}

impl ReconcileOutcome {
    pub(crate) fn event(&self) -> Option<CoreEvent> {
        self.changed.then(|| CoreEvent::QuestReconciled {
            id: self.quest_id.clone(),
            previous_status: self.previous_status.to_string(),
            status: self.status.to_string(),
            assigned_to: self.assigned_to.clone(),
            assignment_cleared: self.assignment_cleared,
        })
    }
}

/// Bring a quest's status and assignment in line with its applications and
/// participants, inside the caller's write transaction
///
/// Completed and deleted quests are left alone. An in-progress or assigned
/// quest with no approved application and no active participant reopens.
/// `assigned_to` must name an active participant: a stale assignee passes to
/// the earliest joined one, or is cleared when nobody is left.
pub(crate) fn reconcile_in(conn: &mut SqliteConnection, quest_id: &str) -> Result<ReconcileOutcome, CoreError> {
    let quest = quests::require_quest(conn, quest_id)?;
    let previous_status = quest.status()?;

    let mut outcome = ReconcileOutcome {
        quest_id: quest.id.clone(),
        previous_status,
        status: previous_status,
        assigned_to: quest.assigned_to.clone(),
        assignment_cleared: false,
        changed: false,
    };

    if previous_status.is_terminal() {
        return Ok(outcome);
    }

    let approved = applications::count_for_quest_with_status(conn, quest_id, ApplicationStatus::Approved)?;
    let active = participants::list_active(conn, quest_id)?;

    if let Some(assignee) = quest.assigned_to.as_deref() {
        if !active.iter().any(|p| p.user_id == assignee) {
            let next = active.first().map(|p| p.user_id.clone());
            quests::set_assigned_to(conn, quest_id, next.as_deref())?;
            outcome.assignment_cleared = next.is_none();
            outcome.assigned_to = next;
        }
    }

    if approved == 0
        && active.is_empty()
        && matches!(previous_status, QuestStatus::InProgress | QuestStatus::Assigned)
    {
        quests::set_status(conn, quest_id, QuestStatus::Open)?;
        outcome.status = QuestStatus::Open;
    }

    outcome.changed = outcome.assigned_to != quest.assigned_to || outcome.status != previous_status;
    if outcome.changed {
        debug!(
            quest_id = %quest_id,
            from = %previous_status,
            to = %outcome.status,
            assigned_to = ?outcome.assigned_to,
            assignment_cleared = outcome.assignment_cleared,
            approved,
            active = active.len(),
            "Quest reconciled"
        );
    }

    Ok(outcome)
}

/// Split `total` evenly over `n` recipients; the first gets the remainder
fn split_reward(total: i64, n: usize) -> Vec<i64> {
    if n == 0 {
        return Vec::new();
    }
    let share = total / n as i64;
    let remainder = total % n as i64;
    let mut shares = vec![share; n];
    shares[0] += remainder;
    shares
}

const MAX_TITLE_LEN: usize = 200;

/// Quest service for business logic
pub struct QuestService {
    db: Database,
    events: Arc<EventBus>,
    refund_commission_on_delete: bool,
}

impl QuestService {
    /// Create a new quest service
    pub fn new(db: Database, events: Arc<EventBus>, refund_commission_on_delete: bool) -> Self {
        Self { db, events, refund_commission_on_delete }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<Quest>, CoreError> {
        self.db.with_conn(|conn| quests::get_quest(conn, id))
    }

    pub fn list(&self, query: &QuestQuery) -> Result<Vec<Quest>, CoreError> {
        self.db.with_conn(|conn| quests::list_quests(conn, query))
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Reconcile one quest in its own transaction
    pub fn reconcile(&self, quest_id: &str) -> Result<ReconcileOutcome, CoreError> {
        let outcome = self.db.with_write_tx(|conn| reconcile_in(conn, quest_id))?;

        if let Some(event) = outcome.event() {
            info!(quest_id = %quest_id, from = %outcome.previous_status, to = %outcome.status, "Quest reconciled");
            self.events.emit(event);
        }

        Ok(outcome)
    }

    /// Reconcile every quest, one transaction each, continuing past failures
    pub fn reconcile_all(&self) -> Result<RepairReport, CoreError> {
        let quest_ids = self.db.with_conn(quests::all_quest_ids)?;
        let mut report = RepairReport::default();

        for quest_id in &quest_ids {
            report.examined += 1;
            match self.reconcile(quest_id) {
                Ok(outcome) if outcome.changed => report.repaired += 1,
                Ok(_) => {}
                Err(e) => report.record_failure(quest_id, &e),
            }
        }

        info!(
            examined = report.examined,
            repaired = report.repaired,
            failed = report.failed,
            "Quest reconcile sweep finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a quest and escrow its reward plus commission from the creator
    pub fn create(&self, input: CreateQuestInput) -> Result<Quest, CoreError> {
        self.validate_quest(&input)?;

        let escrow = input.gold_reward + input.commission_fee;
        let quest = self.db.with_write_tx(|conn| {
            let quest = quests::insert_quest(conn, &input)?;
            if escrow > 0 {
                let description = format!("Escrow for quest '{}'", quest.title);
                record_in(conn, &LedgerEntry {
                    user_id: &quest.creator_id,
                    amount: -escrow,
                    transaction_type: TransactionType::Transfer,
                    quest_id: Some(&quest.id),
                    payment_proof_id: None,
                    commission_fee: quest.commission_fee,
                    description: &description,
                })?;
            }
            Ok(quest)
        })?;

        info!(quest_id = %quest.id, creator_id = %quest.creator_id, escrow, "Quest created");
        self.events.emit(CoreEvent::QuestCreated {
            id: quest.id.clone(),
            creator_id: quest.creator_id.clone(),
            escrowed: escrow,
        });

        Ok(quest)
    }

    /// Voluntarily leave a quest
    ///
    /// The participant row is dropped and the approved application is
    /// rejected with the user as reviewer. Unlike a kick, the user may apply
    /// again while attempts remain.
    pub fn leave(&self, quest_id: &str, user_id: &str) -> Result<ReconcileOutcome, CoreError> {
        let outcome = self.db.with_write_tx(|conn| {
            let quest = quests::require_quest(conn, quest_id)?;
            let status = quest.status()?;
            if status.is_terminal() {
                return Err(CoreError::Validation(format!("quest {} is {}", quest_id, status)));
            }
            if quest.creator_id == user_id {
                return Err(CoreError::Validation("the quest creator cannot leave their own quest".into()));
            }

            let participant = participants::get_participant(conn, quest_id, user_id)?;
            let is_active = match participant {
                Some(ref p) => p.status()?.is_active(),
                None => false,
            };
            if !is_active {
                return Err(CoreError::Validation(format!(
                    "user {} is not participating in quest {}",
                    user_id, quest_id
                )));
            }

            participants::set_status(conn, quest_id, user_id, ParticipantStatus::Dropped)?;
            if let Some(app) = applications::approved_for_pair(conn, quest_id, user_id)? {
                applications::transition(
                    conn,
                    &app.id,
                    ApplicationStatus::Approved,
                    ApplicationStatus::Rejected,
                    user_id,
                    None,
                )?;
            }

            reconcile_in(conn, quest_id)
        })?;

        info!(quest_id = %quest_id, user_id = %user_id, "Participant left quest");
        self.events.emit(CoreEvent::ParticipantLeft {
            quest_id: quest_id.to_string(),
            user_id: user_id.to_string(),
        });
        if let Some(event) = outcome.event() {
            self.events.emit(event);
        }

        Ok(outcome)
    }

    /// Complete a quest and pay the escrowed reward to its active participants
    pub fn complete(&self, quest_id: &str, completed_by: &str) -> Result<Quest, CoreError> {
        let (quest, payouts) = self.db.with_write_tx(|conn| {
            let quest = quests::require_quest(conn, quest_id)?;
            if quest.creator_id != completed_by {
                return Err(CoreError::Validation("only the quest creator can complete it".into()));
            }
            let status = quest.status()?;
            if !matches!(status, QuestStatus::InProgress | QuestStatus::Assigned) {
                return Err(CoreError::conflict("Quest", quest_id, "in-progress|assigned", status.as_str()));
            }

            let active = participants::list_active(conn, quest_id)?;
            if active.is_empty() {
                return Err(CoreError::Validation(format!(
                    "quest {} has no active participants",
                    quest_id
                )));
            }

            let description = format!("Reward for quest '{}'", quest.title);
            let mut payouts = Vec::new();
            for (participant, share) in active.iter().zip(split_reward(quest.gold_reward, active.len())) {
                if share > 0 {
                    let transaction = record_in(conn, &LedgerEntry {
                        user_id: &participant.user_id,
                        amount: share,
                        transaction_type: TransactionType::Reward,
                        quest_id: Some(quest_id),
                        payment_proof_id: None,
                        commission_fee: 0,
                        description: &description,
                    })?;
                    payouts.push(transaction);
                }
            }

            participants::set_all_active(conn, quest_id, ParticipantStatus::Completed)?;
            applications::reject_pending(conn, quest_id, None, completed_by)?;
            quests::set_status(conn, quest_id, QuestStatus::Completed)?;

            Ok((quests::require_quest(conn, quest_id)?, payouts))
        })?;

        let paid_out: i64 = payouts.iter().map(|t| t.amount).sum();
        info!(quest_id = %quest_id, participants = payouts.len(), paid_out, "Quest completed");

        let mut events: Vec<CoreEvent> = payouts
            .iter()
            .map(|transaction| CoreEvent::GoldAwarded {
                user_id: transaction.user_id.clone(),
                amount: transaction.amount,
                transaction_id: transaction.id.clone(),
                quest_id: transaction.quest_id.clone(),
            })
            .collect();
        events.push(CoreEvent::QuestCompleted {
            id: quest.id.clone(),
            participants: payouts.len(),
            paid_out,
        });
        self.events.emit_all(events);

        Ok(quest)
    }

    /// Soft-delete a quest and refund the escrow to its creator
    ///
    /// The commission is kept unless `refund_commission_on_delete` is set.
    pub fn delete(&self, quest_id: &str, deleted_by: &str) -> Result<Quest, CoreError> {
        let refund_commission = self.refund_commission_on_delete;

        let (quest, refunded) = self.db.with_write_tx(|conn| {
            let quest = quests::require_quest(conn, quest_id)?;
            if quest.creator_id != deleted_by {
                return Err(CoreError::Validation("only the quest creator can delete it".into()));
            }
            let status = quest.status()?;
            if status.is_terminal() {
                return Err(CoreError::conflict("Quest", quest_id, "open|assigned|in-progress", status.as_str()));
            }

            participants::set_all_active(conn, quest_id, ParticipantStatus::Dropped)?;
            applications::reject_pending(conn, quest_id, None, deleted_by)?;
            quests::set_assigned_to(conn, quest_id, None)?;
            quests::set_status(conn, quest_id, QuestStatus::Deleted)?;

            let commission = if refund_commission { quest.commission_fee } else { 0 };
            let refund = quest.gold_reward + commission;
            if refund > 0 {
                let description = format!("Refund for deleted quest '{}'", quest.title);
                record_in(conn, &LedgerEntry {
                    user_id: &quest.creator_id,
                    amount: refund,
                    transaction_type: TransactionType::Refund,
                    quest_id: Some(quest_id),
                    payment_proof_id: None,
                    commission_fee: commission,
                    description: &description,
                })?;
            }

            Ok((quests::require_quest(conn, quest_id)?, refund))
        })?;

        info!(quest_id = %quest_id, refunded, "Quest deleted");
        self.events.emit(CoreEvent::QuestDeleted {
            id: quest.id.clone(),
            refunded,
        });

        Ok(quest)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate_quest(&self, input: &CreateQuestInput) -> Result<(), CoreError> {
        if input.creator_id.is_empty() {
            return Err(CoreError::Validation("creator_id is required".into()));
        }

        if input.title.trim().is_empty() {
            return Err(CoreError::Validation("title is required".into()));
        }

        if input.title.chars().count() > MAX_TITLE_LEN {
            return Err(CoreError::Validation(format!(
                "title must be <= {} characters",
                MAX_TITLE_LEN
            )));
        }

        if input.gold_reward < 0 || input.commission_fee < 0 {
            return Err(CoreError::Validation("gold_reward and commission_fee must be >= 0".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::db::transactions;

    fn service() -> (QuestService, Database, tempfile::TempDir) {
        let (db, dir) = test_db();
        (QuestService::new(db.clone(), Arc::new(EventBus::new()), false), db, dir)
    }

    fn fund(db: &Database, user_id: &str, amount: i64) {
        db.with_write_tx(|conn| {
            record_in(conn, &LedgerEntry {
                user_id,
                amount,
                transaction_type: TransactionType::Purchase,
                quest_id: None,
                payment_proof_id: None,
                commission_fee: 0,
                description: "seed",
            })
        })
        .unwrap();
    }

    fn input(gold_reward: i64, commission_fee: i64) -> CreateQuestInput {
        CreateQuestInput {
            creator_id: "creator".into(),
            title: "Repair the mill".into(),
            description: Some("Bring tools".into()),
            gold_reward,
            commission_fee,
        }
    }

    #[test]
    fn test_split_reward() {
        assert_eq!(split_reward(100, 3), vec![34, 33, 33]);
        assert_eq!(split_reward(10, 1), vec![10]);
        assert_eq!(split_reward(0, 2), vec![0, 0]);
        assert!(split_reward(10, 0).is_empty());
    }

    #[test]
    fn test_create_escrows_reward_and_commission() {
        let (quests_svc, db, _dir) = service();
        fund(&db, "creator", 200);

        let quest = quests_svc.create(input(100, 10)).unwrap();
        assert_eq!(quest.status().unwrap(), QuestStatus::Open);

        db.with_conn(|conn| {
            assert_eq!(transactions::cached_balance(conn, "creator")?, 90);
            let escrow = transactions::list_for_quest(conn, &quest.id)?;
            assert_eq!(escrow.len(), 1);
            assert_eq!(escrow[0].amount, -110);
            assert_eq!(escrow[0].base_amount, -100);
            assert_eq!(escrow[0].commission_fee, 10);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_create_with_insufficient_gold_writes_nothing() {
        let (quests_svc, db, _dir) = service();
        fund(&db, "creator", 50);

        let err = quests_svc.create(input(100, 10)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(quests_svc.list(&QuestQuery::default()).unwrap().is_empty());
        assert_eq!(db.with_conn(|conn| transactions::cached_balance(conn, "creator")).unwrap(), 50);
    }

    #[test]
    fn test_create_validation() {
        let (quests_svc, _db, _dir) = service();
        let mut bad = input(0, 0);
        bad.title = "   ".into();
        assert!(matches!(quests_svc.create(bad), Err(CoreError::Validation(_))));

        let mut long = input(0, 0);
        long.title = "x".repeat(201);
        assert!(matches!(quests_svc.create(long), Err(CoreError::Validation(_))));

        assert!(matches!(quests_svc.create(input(-1, 0)), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_reconcile_leaves_terminal_quests() {
        let (quests_svc, db, _dir) = service();
        let quest = quests_svc.create(input(0, 0)).unwrap();
        db.with_write_tx(|conn| quests::set_status(conn, &quest.id, QuestStatus::Completed)).unwrap();

        let outcome = quests_svc.reconcile(&quest.id).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.status, QuestStatus::Completed);
    }

    #[test]
    fn test_reconcile_reopens_abandoned_quest() {
        let (quests_svc, db, _dir) = service();
        let quest = quests_svc.create(input(0, 0)).unwrap();
        db.with_write_tx(|conn| {
            quests::set_status(conn, &quest.id, QuestStatus::InProgress)?;
            quests::set_assigned_to(conn, &quest.id, Some("ghost"))
        })
        .unwrap();

        let outcome = quests_svc.reconcile(&quest.id).unwrap();
        assert!(outcome.changed);
        assert!(outcome.assignment_cleared);
        assert_eq!(outcome.previous_status, QuestStatus::InProgress);
        assert_eq!(outcome.status, QuestStatus::Open);

        let again = quests_svc.reconcile(&quest.id).unwrap();
        assert!(!again.changed);

        let report = quests_svc.reconcile_all().unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.repaired, 0);
    }

    #[test]
    fn test_delete_refunds_reward_only_by_default() {
        let (quests_svc, db, _dir) = service();
        fund(&db, "creator", 110);
        let quest = quests_svc.create(input(100, 10)).unwrap();

        assert!(matches!(quests_svc.delete(&quest.id, "someone"), Err(CoreError::Validation(_))));

        let deleted = quests_svc.delete(&quest.id, "creator").unwrap();
        assert_eq!(deleted.status().unwrap(), QuestStatus::Deleted);
        assert_eq!(db.with_conn(|conn| transactions::cached_balance(conn, "creator")).unwrap(), 100);

        assert!(matches!(
            quests_svc.delete(&quest.id, "creator"),
            Err(CoreError::StateConflict { .. })
        ));
    }

    #[test]
    fn test_delete_can_refund_commission() {
        let (db, _dir) = test_db();
        let quests_svc = QuestService::new(db.clone(), Arc::new(EventBus::new()), true);
        fund(&db, "creator", 110);
        let quest = quests_svc.create(input(100, 10)).unwrap();

        quests_svc.delete(&quest.id, "creator").unwrap();
        db.with_conn(|conn| {
            assert_eq!(transactions::cached_balance(conn, "creator")?, 110);
            let refund = transactions::list_for_quest(conn, &quest.id)?
                .into_iter()
                .find(|t| t.transaction_type().ok() == Some(TransactionType::Refund))
                .expect("refund row");
            assert_eq!(refund.amount, 110);
            assert_eq!(refund.base_amount, 100);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_complete_requires_participants() {
        let (quests_svc, db, _dir) = service();
        let quest = quests_svc.create(input(0, 0)).unwrap();

        assert!(matches!(
            quests_svc.complete(&quest.id, "creator"),
            Err(CoreError::StateConflict { .. })
        ));

        db.with_write_tx(|conn| quests::set_status(conn, &quest.id, QuestStatus::InProgress)).unwrap();
        assert!(matches!(quests_svc.complete(&quest.id, "creator"), Err(CoreError::Validation(_))));
    }
}
