//! Redis store errors.

use cas_ticket::TicketError;

/// Errors raised by the Redis store and lock.
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// A command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No connection could be taken from the pool.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// The pool could not be created.
    #[error("Redis pool creation error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// A record kept being replaced while it was removed.
    #[error("Ticket record [{0}] changed during removal")]
    Contended(String),

    /// A stored record is missing fields or has malformed values.
    #[error("Corrupt ticket record [{key}]: {message}")]
    Corrupt { key: String, message: String },
}

impl RedisStoreError {
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<RedisStoreError> for TicketError {
    fn from(err: RedisStoreError) -> Self {
        TicketError::registry(err.to_string())
    }
}

pub type RedisStoreResult<T> = Result<T, RedisStoreError>;
