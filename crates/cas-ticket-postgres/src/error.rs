//! PostgreSQL store errors.

use cas_ticket::TicketError;

/// Errors that can occur during ticket storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row has malformed values.
    #[error("Corrupt ticket row [{key}]: {message}")]
    Corrupt { key: String, message: String },

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Create a `Migration` error.
    #[must_use]
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    /// Create a `Corrupt` error.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<StorageError> for TicketError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput(message) => TicketError::validation(message),
            other => TicketError::registry(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
