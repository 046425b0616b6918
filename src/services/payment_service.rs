//! Payment service - receipt review and the at-most-once gold award
//!
//! Receipts are reviewed by hand. Verification and the award run in one write
//! transaction; a standalone `award_payment_gold` retries the award for an
//! already verified proof and is safe to call from any number of workers.

use std::sync::Arc;

use diesel::SqliteConnection;
use tracing::{debug, info};

use crate::db::models::{PaymentProof, PaymentStatus, Transaction, TransactionType};
use crate::db::payment_proofs::{self, SubmitPaymentProofInput};
use crate::db::transactions::LedgerEntry;
use crate::db::Database;
use crate::error::CoreError;

use super::events::{CoreEvent, EventBus};
use super::ledger_service::record_in;

/// Claim the award flag and credit the proof's gold
///
/// Runs inside the caller's write transaction. When the flag was already
/// claimed nothing is written and `DuplicateAward` comes back.
pub(crate) fn award_in(conn: &mut SqliteConnection, proof: &PaymentProof) -> Result<Transaction, CoreError> {
    if !payment_proofs::claim_award(conn, &proof.id)? {
        return Err(CoreError::DuplicateAward(proof.id.clone()));
    }

    let description = format!("Gold purchase ({})", proof.payment_reference);
    record_in(conn, &LedgerEntry {
        user_id: &proof.user_id,
        amount: proof.package_gold,
        transaction_type: TransactionType::Purchase,
        quest_id: None,
        payment_proof_id: Some(&proof.id),
        commission_fee: 0,
        description: &description,
    })
}

/// Payment service for business logic
pub struct PaymentService {
    db: Database,
    events: Arc<EventBus>,
}

impl PaymentService {
    /// Create a new payment service
    pub fn new(db: Database, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<PaymentProof>, CoreError> {
        self.db.with_conn(|conn| payment_proofs::get_proof(conn, id))
    }

    /// Review queue for one status, oldest first
    pub fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentProof>, CoreError> {
        self.db.with_conn(|conn| payment_proofs::list_by_status(conn, status))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Queue a receipt for review
    pub fn submit(&self, input: SubmitPaymentProofInput) -> Result<PaymentProof, CoreError> {
        self.validate_submission(&input)?;

        let proof = self.db.with_write_tx(|conn| {
            if payment_proofs::find_by_reference(conn, &input.payment_reference)?.is_some() {
                return Err(CoreError::Validation(format!(
                    "payment reference '{}' was already submitted",
                    input.payment_reference
                )));
            }
            payment_proofs::insert_proof(conn, &input)
        })?;

        info!(payment_proof_id = %proof.id, user_id = %proof.user_id, package_gold = proof.package_gold, "Payment proof submitted");
        Ok(proof)
    }

    /// queued → processing
    pub fn start_processing(&self, id: &str, reviewer: &str) -> Result<PaymentProof, CoreError> {
        let proof = self.db.with_write_tx(|conn| {
            payment_proofs::require_proof(conn, id)?;
            payment_proofs::transition(conn, id, &[PaymentStatus::Queued], PaymentStatus::Processing, reviewer, None)
        })?;

        self.emit_reviewed(&proof, reviewer);
        Ok(proof)
    }

    /// queued/processing → verified, awarding the gold in the same transaction
    ///
    /// Returns whether this call credited the gold.
    pub fn verify(&self, id: &str, reviewer: &str) -> Result<bool, CoreError> {
        let (proof, transaction) = self.db.with_write_tx(|conn| {
            payment_proofs::require_proof(conn, id)?;
            let proof = payment_proofs::transition(
                conn,
                id,
                &PaymentStatus::REVIEWABLE,
                PaymentStatus::Verified,
                reviewer,
                None,
            )?;
            let transaction = match award_in(conn, &proof) {
                Ok(transaction) => Some(transaction),
                Err(CoreError::DuplicateAward(_)) => None,
                Err(e) => return Err(e),
            };
            Ok((proof, transaction))
        })?;

        self.emit_reviewed(&proof, reviewer);
        if let Some(ref transaction) = transaction {
            self.emit_awarded(&proof, transaction);
        }
        Ok(transaction.is_some())
    }

    /// queued/processing → rejected
    pub fn reject(&self, id: &str, reviewer: &str, reason: &str) -> Result<PaymentProof, CoreError> {
        if reason.trim().is_empty() {
            return Err(CoreError::Validation("rejection reason is required".into()));
        }

        let proof = self.db.with_write_tx(|conn| {
            payment_proofs::require_proof(conn, id)?;
            payment_proofs::transition(
                conn,
                id,
                &PaymentStatus::REVIEWABLE,
                PaymentStatus::Rejected,
                reviewer,
                Some(reason),
            )
        })?;

        self.emit_reviewed(&proof, reviewer);
        Ok(proof)
    }

    /// Credit a verified proof's gold at most once across all callers
    ///
    /// `Ok(true)` for the single caller that credited, `Ok(false)` for every
    /// caller that found the gold already awarded.
    pub fn award_payment_gold(&self, id: &str) -> Result<bool, CoreError> {
        // Read outside the write lock; package_gold never changes.
        let proof = self.db.with_conn(|conn| payment_proofs::require_proof(conn, id))?;

        let status = proof.status()?;
        if status != PaymentStatus::Verified {
            return Err(CoreError::Validation(format!(
                "payment proof {} is {}, only verified proofs are awarded",
                id, status
            )));
        }

        if proof.is_awarded() {
            debug!(payment_proof_id = %id, "Gold already awarded, skipping");
            return Ok(false);
        }

        match self.db.with_write_tx(|conn| award_in(conn, &proof)) {
            Ok(transaction) => {
                self.emit_awarded(&proof, &transaction);
                Ok(true)
            }
            Err(CoreError::DuplicateAward(_)) => {
                debug!(payment_proof_id = %id, "Lost award race, gold already awarded");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn validate_submission(&self, input: &SubmitPaymentProofInput) -> Result<(), CoreError> {
        if input.user_id.is_empty() {
            return Err(CoreError::Validation("user_id is required".into()));
        }

        let reference = input.payment_reference.trim();
        if reference.is_empty() {
            return Err(CoreError::Validation("payment_reference is required".into()));
        }
        if reference.len() > 255 {
            return Err(CoreError::Validation("payment_reference must be <= 255 characters".into()));
        }

        if input.package_gold <= 0 {
            return Err(CoreError::Validation(format!(
                "package_gold must be positive, got {}",
                input.package_gold
            )));
        }

        Ok(())
    }

    fn emit_reviewed(&self, proof: &PaymentProof, reviewer: &str) {
        self.events.emit(CoreEvent::PaymentProofReviewed {
            id: proof.id.clone(),
            status: proof.status.clone(),
            reviewed_by: reviewer.to_string(),
        });
    }

    fn emit_awarded(&self, proof: &PaymentProof, transaction: &Transaction) {
        info!(
            payment_proof_id = %proof.id,
            user_id = %proof.user_id,
            amount = proof.package_gold,
            "Payment gold awarded"
        );
        self.events.emit(CoreEvent::PaymentGoldAwarded {
            payment_proof_id: proof.id.clone(),
            user_id: proof.user_id.clone(),
            amount: proof.package_gold,
            transaction_id: transaction.id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::db::transactions;

    fn service() -> (PaymentService, Database, tempfile::TempDir) {
        let (db, dir) = test_db();
        (PaymentService::new(db.clone(), Arc::new(EventBus::new())), db, dir)
    }

    fn input(reference: &str, gold: i64) -> SubmitPaymentProofInput {
        SubmitPaymentProofInput {
            user_id: "alice".into(),
            payment_reference: reference.into(),
            package_gold: gold,
        }
    }

    fn balance(db: &Database, user_id: &str) -> i64 {
        db.with_conn(|conn| transactions::cached_balance(conn, user_id)).unwrap()
    }

    #[test]
    fn test_verify_awards_once() {
        let (payments, db, _dir) = service();
        let proof = payments.submit(input("GCASH-100", 300)).unwrap();
        assert_eq!(proof.status().unwrap(), PaymentStatus::Queued);

        payments.start_processing(&proof.id, "admin").unwrap();
        assert!(payments.verify(&proof.id, "admin").unwrap());
        assert_eq!(balance(&db, "alice"), 300);

        assert!(!payments.award_payment_gold(&proof.id).unwrap());
        assert_eq!(balance(&db, "alice"), 300);

        let ledger = db
            .with_conn(|conn| transactions::list_for_payment_proof(conn, &proof.id))
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].transaction_type().unwrap(), TransactionType::Purchase);
    }

    #[test]
    fn test_award_requires_verified_proof() {
        let (payments, _db, _dir) = service();
        let proof = payments.submit(input("GCASH-101", 100)).unwrap();

        let err = payments.award_payment_gold(&proof.id).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = payments.award_payment_gold("missing").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_submission_validation() {
        let (payments, _db, _dir) = service();
        payments.submit(input("GCASH-102", 100)).unwrap();

        assert!(matches!(payments.submit(input("GCASH-102", 100)), Err(CoreError::Validation(_))));
        assert!(matches!(payments.submit(input("GCASH-103", 0)), Err(CoreError::Validation(_))));
        assert!(matches!(payments.submit(input("  ", 10)), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_rejected_proof_cannot_be_verified() {
        let (payments, db, _dir) = service();
        let proof = payments.submit(input("GCASH-104", 100)).unwrap();

        let rejected = payments.reject(&proof.id, "admin", "amount mismatch").unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("amount mismatch"));

        assert!(matches!(payments.verify(&proof.id, "admin"), Err(CoreError::StateConflict { .. })));
        assert!(matches!(payments.reject(&proof.id, "admin", "again"), Err(CoreError::StateConflict { .. })));
        assert_eq!(balance(&db, "alice"), 0);
    }

    #[test]
    fn test_processing_proof_is_still_reviewable() {
        let (payments, db, _dir) = service();
        let proof = payments.submit(input("GCASH-105", 100)).unwrap();
        payments.start_processing(&proof.id, "admin").unwrap();
        assert!(matches!(payments.start_processing(&proof.id, "admin"), Err(CoreError::StateConflict { .. })));

        let rejected = payments.reject(&proof.id, "admin", "duplicate receipt").unwrap();
        assert_eq!(rejected.status().unwrap(), PaymentStatus::Rejected);
        assert_eq!(payments.list_by_status(PaymentStatus::Processing).unwrap().len(), 0);
        assert_eq!(balance(&db, "alice"), 0);
    }
}
