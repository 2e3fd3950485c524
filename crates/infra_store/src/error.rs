//! Store error type.

use thiserror::Error;

/// Errors raised by a [`Store`](crate::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected a statement or the connection failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// A stored value does not map onto the record types.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// An in-memory lock was poisoned by a panicking holder.
    #[error("Lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Connection-level failures that a retry of the whole operation may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            )
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
