//! Error types for the catalog store.

use thiserror::Error;

/// Catalog store result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Catalog store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A table or column name that may not be used as an SQL identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Constraint violation that survived the retry protocol
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data that cannot be decoded back into catalog types
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DbError {
    /// Create a constraint error.
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True when the store itself is unreachable, as opposed to a single
    /// statement failing. Callers abort a whole batch on this.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            DbError::Sqlx(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn is_duplicate_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("duplicate column name"),
        _ => false,
    }
}
