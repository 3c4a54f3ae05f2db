use domain::ErrorKind;
use thiserror::Error;

/// Name of the unique constraint on print request idempotency keys.
pub const IDEMPOTENCY_KEY_CONSTRAINT: &str = "uq_print_requests_idempotency_key";

/// Name of the primary key constraint on the inbound dedup fence.
pub const PROCESSED_MESSAGE_CONSTRAINT: &str = "pk_processed_messages";

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("Duplicate key violates constraint {constraint}")]
    DuplicateKey { constraint: String },

    /// A persisted value could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The store refused the operation (used by the in-memory store's fault injection).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::DuplicateKey { .. } => ErrorKind::Conflict,
            _ => ErrorKind::TransientInfra,
        }
    }

    /// Returns true if the error is a violation of the named unique constraint.
    pub fn is_duplicate_of(&self, name: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { constraint } if constraint == name)
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_a_conflict() {
        let err = StoreError::DuplicateKey {
            constraint: IDEMPOTENCY_KEY_CONSTRAINT.to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_duplicate_of(IDEMPOTENCY_KEY_CONSTRAINT));
        assert!(!err.is_duplicate_of(PROCESSED_MESSAGE_CONSTRAINT));
    }

    #[test]
    fn infrastructure_errors_are_transient() {
        assert_eq!(
            StoreError::Unavailable("down".into()).kind(),
            ErrorKind::TransientInfra
        );
        assert_eq!(
            StoreError::Database(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::TransientInfra
        );
    }
}
