//! Error types for peerquest-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} is {actual}, expected {expected}")]
    StateConflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Balance drift for user {user_id}: cached {cached}, ledger {ledger}")]
    Consistency {
        user_id: String,
        cached: i64,
        ledger: i64,
    },

    #[error("Gold already awarded for payment proof {0}")]
    DuplicateAward(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a state conflict on a named entity
    pub fn conflict(
        entity: &'static str,
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::StateConflict {
            entity,
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// HTTP status the calling layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::StateConflict { .. } | CoreError::DuplicateAward(_) => 409,
            _ => 500,
        }
    }
}

impl From<diesel::r2d2::PoolError> for CoreError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        CoreError::Pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CoreError::Validation("x".into()).status_code(), 400);
        assert_eq!(CoreError::NotFound("x".into()).status_code(), 404);
        assert_eq!(CoreError::conflict("Application", "a1", "pending", "approved").status_code(), 409);
        assert_eq!(CoreError::DuplicateAward("p1".into()).status_code(), 409);
        assert_eq!(CoreError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_conflict_message() {
        let err = CoreError::conflict("Application", "a1", "pending", "kicked");
        assert_eq!(err.to_string(), "Application a1 is kicked, expected pending");
    }
}
