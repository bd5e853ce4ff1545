//! Error types for the PostgreSQL storage backend.

use productcache_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is "undefined table" (42P01).
pub fn is_undefined_table(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNDEFINED_TABLE)
}

/// Errors specific to the PostgreSQL storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => match e {
                SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                    StorageError::connection_error(e.to_string())
                }
                SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) => {
                    StorageError::invalid_data(format!("Unreadable product row: {e}"))
                }
                other if is_undefined_table(&other) => StorageError::internal(format!(
                    "Product table missing (run migrations): {other}"
                )),
                other => StorageError::internal(other.to_string()),
            },
            PostgresError::Migration(e) => StorageError::internal(format!("Migration error: {e}")),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostgresError::config("invalid URL");
        assert!(err.to_string().contains("Configuration error"));

        let err = PostgresError::Migration("checksum mismatch".into());
        assert!(err.to_string().contains("Migration error"));
    }

    #[test]
    fn test_conversion_to_storage_error() {
        let storage_err: StorageError = PostgresError::config("test error").into();
        assert!(matches!(storage_err, StorageError::Internal { .. }));

        let storage_err: StorageError = PostgresError::Connection(SqlxError::PoolTimedOut).into();
        assert!(matches!(storage_err, StorageError::ConnectionError { .. }));

        let storage_err: StorageError =
            PostgresError::Connection(SqlxError::Decode("price is not text".into())).into();
        assert!(matches!(storage_err, StorageError::InvalidData { .. }));
        assert!(storage_err.to_string().contains("price is not text"));
    }
}
