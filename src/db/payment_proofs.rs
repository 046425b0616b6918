//! Payment proofs and the at-most-once award flag

use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::diesel_schema::payment_proofs;
use super::models::{current_timestamp, NewPaymentProof, PaymentProof, PaymentStatus};
use crate::error::CoreError;

/// Input for submitting a payment proof
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPaymentProofInput {
    pub user_id: String,
    pub payment_reference: String,
    pub package_gold: i64,
}

pub fn get_proof(conn: &mut SqliteConnection, id: &str) -> Result<Option<PaymentProof>, CoreError> {
    payment_proofs::table
        .filter(payment_proofs::id.eq(id))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

pub fn require_proof(conn: &mut SqliteConnection, id: &str) -> Result<PaymentProof, CoreError> {
    get_proof(conn, id)?.ok_or_else(|| CoreError::NotFound(format!("payment proof {}", id)))
}

pub fn find_by_reference(
    conn: &mut SqliteConnection,
    payment_reference: &str,
) -> Result<Option<PaymentProof>, CoreError> {
    payment_proofs::table
        .filter(payment_proofs::payment_reference.eq(payment_reference))
        .first(conn)
        .optional()
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

/// Proofs in a given status, oldest first (review queue)
pub fn list_by_status(
    conn: &mut SqliteConnection,
    status: PaymentStatus,
) -> Result<Vec<PaymentProof>, CoreError> {
    payment_proofs::table
        .filter(payment_proofs::status.eq(status.as_str()))
        .order(payment_proofs::submitted_at.asc())
        .load(conn)
        .map_err(|e| CoreError::Internal(format!("Query failed: {}", e)))
}

pub fn insert_proof(
    conn: &mut SqliteConnection,
    input: &SubmitPaymentProofInput,
) -> Result<PaymentProof, CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = current_timestamp();

    let new_proof = NewPaymentProof {
        id: &id,
        user_id: &input.user_id,
        payment_reference: &input.payment_reference,
        package_gold: input.package_gold,
        status: PaymentStatus::Queued.as_str(),
        gold_awarded: 0,
        submitted_at: &now,
    };

    diesel::insert_into(payment_proofs::table)
        .values(&new_proof)
        .execute(conn)
        .map_err(|e| CoreError::Internal(format!("Insert failed: {}", e)))?;

    require_proof(conn, &id)
}

/// Move a proof between review states; zero rows changed means the proof was
/// not in any of `from`
pub fn transition(
    conn: &mut SqliteConnection,
    id: &str,
    from: &[PaymentStatus],
    to: PaymentStatus,
    reviewed_by: &str,
    rejection_reason: Option<&str>,
) -> Result<PaymentProof, CoreError> {
    let from_values: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

    let changed = diesel::update(
        payment_proofs::table
            .filter(payment_proofs::id.eq(id))
            .filter(payment_proofs::status.eq_any(from_values.clone())),
    )
    .set((
        payment_proofs::status.eq(to.as_str()),
        payment_proofs::reviewed_by.eq(reviewed_by),
        payment_proofs::reviewed_at.eq(current_timestamp()),
        payment_proofs::rejection_reason.eq(rejection_reason),
    ))
    .execute(conn)
    .map_err(|e| CoreError::Internal(format!("Update failed: {}", e)))?;

    let proof = require_proof(conn, id)?;
    if changed == 0 {
        return Err(CoreError::conflict("PaymentProof", id, from_values.join("|"), proof.status));
    }
    Ok(proof)
}

/// Atomically flip `gold_awarded` 0 → 1 for a verified proof
///
/// Returns true for exactly one caller per proof: the compare and the set are
/// a single UPDATE, so a second caller sees `gold_awarded = 1` and changes
/// nothing.
pub fn claim_award(conn: &mut SqliteConnection, id: &str) -> Result<bool, CoreError> {
    let changed = diesel::update(
        payment_proofs::table
            .filter(payment_proofs::id.eq(id))
            .filter(payment_proofs::gold_awarded.eq(0))
            .filter(payment_proofs::status.eq(PaymentStatus::Verified.as_str())),
    )
    .set((
        payment_proofs::gold_awarded.eq(1),
        payment_proofs::awarded_at.eq(current_timestamp()),
    ))
    .execute(conn)
    .map_err(|e| CoreError::Internal(format!("Award claim failed: {}", e)))?;

    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn submit(conn: &mut SqliteConnection, reference: &str) -> PaymentProof {
        insert_proof(conn, &SubmitPaymentProofInput {
            user_id: "alice".into(),
            payment_reference: reference.into(),
            package_gold: 500,
        })
        .unwrap()
    }

    #[test]
    fn test_claim_requires_verified_and_happens_once() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            let proof = submit(conn, "GCASH-001");
            assert!(!claim_award(conn, &proof.id)?, "queued proofs cannot be claimed");

            transition(conn, &proof.id, &[PaymentStatus::Queued], PaymentStatus::Verified, "admin", None)?;
            assert!(claim_award(conn, &proof.id)?);
            assert!(!claim_award(conn, &proof.id)?);

            let proof = require_proof(conn, &proof.id)?;
            assert!(proof.is_awarded());
            assert!(proof.awarded_at.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_transition_from_wrong_state() {
        let (db, _dir) = test_db();
        db.with_write_tx(|conn| {
            let proof = submit(conn, "GCASH-002");
            transition(conn, &proof.id, &[PaymentStatus::Queued], PaymentStatus::Rejected, "admin", Some("blurry"))?;
            let err = transition(
                conn,
                &proof.id,
                &[PaymentStatus::Queued, PaymentStatus::Processing],
                PaymentStatus::Verified,
                "admin",
                None,
            )
            .unwrap_err();
            assert!(matches!(err, CoreError::StateConflict { .. }));
            assert_eq!(list_by_status(conn, PaymentStatus::Rejected)?.len(), 1);
            assert!(find_by_reference(conn, "GCASH-002")?.is_some());
            Ok(())
        })
        .unwrap();
    }
}
