//! Storage error types for the backing store abstraction.

use std::fmt;
use std::time::Duration;

use crate::types::ProductId;

/// Errors that can occur during backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested product was not found.
    #[error("Product not found: {id}")]
    NotFound {
        /// The ID of the product that was not found.
        id: ProductId,
    },

    /// The stored or submitted data is invalid.
    #[error("Invalid data: {message}")]
    InvalidData {
        /// Description of why the data is invalid.
        message: String,
    },

    /// Failed to connect to the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Operation timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// How long the operation was allowed to run.
        elapsed: Duration,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(id: ProductId) -> Self {
        Self::NotFound { id }
    }

    /// Creates a new `InvalidData` error.
    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidData { .. } => ErrorCategory::Validation,
            Self::ConnectionError { .. } | Self::Timeout { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Product not found.
    NotFound,
    /// Validation error.
    Validation,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found(42);
        assert_eq!(err.to_string(), "Product not found: 42");

        let err = StorageError::timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Operation timed out after 250ms");

        let err = StorageError::connection_error("refused");
        assert_eq!(err.to_string(), "Connection error: refused");
    }

    #[test]
    fn test_error_predicates() {
        assert!(StorageError::not_found(1).is_not_found());
        assert!(!StorageError::timeout(Duration::from_secs(1)).is_not_found());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found(1).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::invalid_data("bad price").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            StorageError::timeout(Duration::from_secs(1)).category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            StorageError::internal("boom").category(),
            ErrorCategory::Internal
        );
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
