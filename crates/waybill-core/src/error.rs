//! Store-level error type.
//!
//! Every repository operation returns [`CoreError`]. A `Database` error is a
//! transaction-level failure (begin, query or commit) and aborts the current
//! worker cycle only. `Decode` marks a single row that could not be parsed;
//! callers drop that row from the batch and carry on.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Constraint violation, e.g. a duplicate shipment identifier.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input handed to the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored row could not be decoded into a domain value.
    #[error("decode error: {0}")]
    Decode(String),
}

impl CoreError {
    /// Returns true for failures that abort a whole transaction.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            sqlx::Error::ColumnDecode { index, source } => {
                Self::Decode(format!("column {index}: {source}"))
            },
            sqlx::Error::Decode(source) => Self::Decode(source.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(!err.is_store_failure());
    }

    #[test]
    fn pool_failures_are_store_failures() {
        let err = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_store_failure());
        assert!(err.to_string().starts_with("database error"));
    }

    #[test]
    fn decode_failures_are_row_local() {
        let err = CoreError::from(sqlx::Error::Decode("bad status".into()));
        assert!(matches!(err, CoreError::Decode(_)));
        assert!(!err.is_store_failure());
    }
}
