//! Service layer for peerquest-core
//!
//! Services encapsulate business logic between request handlers and
//! repositories. Each service wraps database operations with:
//! - Input validation
//! - Cross-entity orchestration
//! - Transaction boundaries (one `BEGIN IMMEDIATE` per operation)
//! - Event emission after commit
//!
//! ## Architecture
//!
//! ```text
//! Request handlers / maintenance CLI
//!     ↓
//! PeerQuest (service container)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod ledger_service;
pub mod payment_service;
pub mod attempt_service;
pub mod quest_service;
pub mod application_service;

// Re-exports
pub use events::{CoreEvent, EventBus, EventListener};
pub use ledger_service::{BalanceCheck, LedgerService};
pub use payment_service::PaymentService;
pub use attempt_service::{AttemptService, AttemptStatus};
pub use quest_service::{QuestService, ReconcileOutcome};
pub use application_service::ApplicationService;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::db::models::{
    Application, ApplicationAttempt, PaymentProof, Quest, Transaction, TransactionType,
};
use crate::db::payment_proofs::SubmitPaymentProofInput;
use crate::db::quests::{CreateQuestInput, QuestQuery};
use crate::db::Database;
use crate::error::CoreError;

/// Outcome of a batch repair sweep
#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export, export_to = "bindings/"))]
pub struct RepairReport {
    pub examined: usize,
    pub repaired: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl RepairReport {
    /// Log a per-record failure and keep going
    pub fn record_failure(&mut self, id: &str, error: &CoreError) {
        warn!(id = %id, error = %error, "Repair step failed, continuing");
        self.failed += 1;
        self.errors.push(format!("{}: {}", id, error));
    }
}

/// Service container for dependency injection
///
/// Holds all services over one shared pool and event bus, and exposes the
/// entry points callers use.
pub struct PeerQuest {
    pub db: Database,
    pub ledger: Arc<LedgerService>,
    pub payments: Arc<PaymentService>,
    pub attempts: Arc<AttemptService>,
    pub quests: Arc<QuestService>,
    pub applications: Arc<ApplicationService>,
    pub events: Arc<EventBus>,
}

impl PeerQuest {
    /// Open the database described by `config` and build all services
    pub fn open(config: &Config) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open(config)?;
        Ok(Self::new(db, config))
    }

    /// Create all services over an already open database
    pub fn new(db: Database, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        let max_attempts = config.max_application_attempts;

        Self {
            ledger: Arc::new(LedgerService::new(db.clone(), events.clone())),
            payments: Arc::new(PaymentService::new(db.clone(), events.clone())),
            attempts: Arc::new(AttemptService::new(db.clone(), max_attempts)),
            quests: Arc::new(QuestService::new(
                db.clone(),
                events.clone(),
                config.refund_commission_on_delete,
            )),
            applications: Arc::new(ApplicationService::new(db.clone(), events.clone(), max_attempts)),
            events,
            db,
        }
    }

    // =========================================================================
    // Applications
    // =========================================================================

    pub fn create_application(
        &self,
        quest_id: &str,
        user_id: &str,
        message: Option<&str>,
    ) -> Result<Application, CoreError> {
        self.applications.create(quest_id, user_id, message)
    }

    pub fn approve_application(&self, application_id: &str, reviewer: &str) -> Result<Application, CoreError> {
        self.applications.approve(application_id, reviewer)
    }

    pub fn reject_application(&self, application_id: &str, reviewer: &str) -> Result<Application, CoreError> {
        self.applications.reject(application_id, reviewer)
    }

    pub fn kick_application(
        &self,
        application_id: &str,
        kicker: &str,
        reason: Option<&str>,
    ) -> Result<Application, CoreError> {
        self.applications.kick(application_id, kicker, reason)
    }

    // =========================================================================
    // Attempts
    // =========================================================================

    pub fn can_apply_again(&self, quest_id: &str, user_id: &str) -> Result<(bool, String), CoreError> {
        self.attempts.can_apply_again(quest_id, user_id)
    }

    pub fn get_attempt_count(&self, quest_id: &str, user_id: &str) -> Result<i64, CoreError> {
        self.attempts.get_attempt_count(quest_id, user_id)
    }

    pub fn check_attempts(&self, quest_id: &str, user_id: &str) -> Result<AttemptStatus, CoreError> {
        self.attempts.check_attempts(quest_id, user_id)
    }

    pub fn attempt_history(&self, quest_id: &str, user_id: &str) -> Result<Vec<ApplicationAttempt>, CoreError> {
        self.attempts.attempt_history(quest_id, user_id)
    }

    pub fn record_attempt(
        &self,
        quest_id: &str,
        user_id: &str,
        application_id: &str,
    ) -> Result<ApplicationAttempt, CoreError> {
        self.attempts.record_attempt(quest_id, user_id, application_id)
    }

    pub fn backfill_attempts(&self) -> Result<RepairReport, CoreError> {
        self.attempts.backfill_attempts()
    }

    // =========================================================================
    // Quests
    // =========================================================================

    pub fn create_quest(&self, input: CreateQuestInput) -> Result<Quest, CoreError> {
        self.quests.create(input)
    }

    pub fn get_quest(&self, quest_id: &str) -> Result<Option<Quest>, CoreError> {
        self.quests.get(quest_id)
    }

    pub fn list_quests(&self, query: &QuestQuery) -> Result<Vec<Quest>, CoreError> {
        self.quests.list(query)
    }

    pub fn leave_quest(&self, quest_id: &str, user_id: &str) -> Result<ReconcileOutcome, CoreError> {
        self.quests.leave(quest_id, user_id)
    }

    pub fn complete_quest(&self, quest_id: &str, completed_by: &str) -> Result<Quest, CoreError> {
        self.quests.complete(quest_id, completed_by)
    }

    pub fn delete_quest(&self, quest_id: &str, deleted_by: &str) -> Result<Quest, CoreError> {
        self.quests.delete(quest_id, deleted_by)
    }

    pub fn reconcile_quest(&self, quest_id: &str) -> Result<ReconcileOutcome, CoreError> {
        self.quests.reconcile(quest_id)
    }

    pub fn reconcile_all_quests(&self) -> Result<RepairReport, CoreError> {
        self.quests.reconcile_all()
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    pub fn record_transaction(
        &self,
        user_id: &str,
        amount: i64,
        transaction_type: TransactionType,
        quest_id: Option<&str>,
        description: &str,
        commission_fee: i64,
    ) -> Result<Transaction, CoreError> {
        self.ledger
            .record_transaction(user_id, amount, transaction_type, quest_id, description, commission_fee)
    }

    pub fn award_gold(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        quest_id: Option<&str>,
    ) -> Result<Transaction, CoreError> {
        self.ledger.award_gold(user_id, amount, reason, quest_id)
    }

    pub fn get_balance(&self, user_id: &str) -> Result<i64, CoreError> {
        self.ledger.get_balance(user_id)
    }

    pub fn list_transactions(&self, user_id: &str, limit: i64) -> Result<Vec<Transaction>, CoreError> {
        self.ledger.list_transactions(user_id, limit)
    }

    pub fn check_balance(&self, user_id: &str) -> Result<BalanceCheck, CoreError> {
        self.ledger.check_balance(user_id)
    }

    pub fn recompute_user_balance(&self, user_id: &str) -> Result<i64, CoreError> {
        self.ledger.recompute_balance(user_id)
    }

    pub fn recompute_all_balances(&self) -> Result<RepairReport, CoreError> {
        self.ledger.recompute_all_balances()
    }

    // =========================================================================
    // Payments
    // =========================================================================

    pub fn submit_payment_proof(
        &self,
        user_id: &str,
        payment_reference: &str,
        package_gold: i64,
    ) -> Result<PaymentProof, CoreError> {
        self.payments.submit(SubmitPaymentProofInput {
            user_id: user_id.to_string(),
            payment_reference: payment_reference.to_string(),
            package_gold,
        })
    }

    pub fn start_processing(&self, payment_proof_id: &str, reviewer: &str) -> Result<PaymentProof, CoreError> {
        self.payments.start_processing(payment_proof_id, reviewer)
    }

    pub fn verify_payment_proof(&self, payment_proof_id: &str, reviewer: &str) -> Result<bool, CoreError> {
        self.payments.verify(payment_proof_id, reviewer)
    }

    pub fn reject_payment_proof(
        &self,
        payment_proof_id: &str,
        reviewer: &str,
        reason: &str,
    ) -> Result<PaymentProof, CoreError> {
        self.payments.reject(payment_proof_id, reviewer, reason)
    }

    pub fn award_payment_gold(&self, payment_proof_id: &str) -> Result<bool, CoreError> {
        self.payments.award_payment_gold(payment_proof_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[test]
    fn test_repair_report_records_failures() {
        let mut report = RepairReport::default();
        report.record_failure("q1", &CoreError::NotFound("quest q1".into()));
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, vec!["q1: Not found: quest q1".to_string()]);
    }

    #[test]
    fn test_container_shares_one_database() {
        let (db, _dir) = test_db();
        let pq = PeerQuest::new(db, &Config::default());
        pq.award_gold("alice", 15, "welcome", None).unwrap();
        assert_eq!(pq.get_balance("alice").unwrap(), 15);
        assert_eq!(pq.db.stats().unwrap().transaction_count, 1);
    }
}
