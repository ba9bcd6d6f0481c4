//! Ticket error types.
//!
//! Every failure surfaced by the ticket subsystem is a [`TicketError`].
//! Backend crates wrap their driver errors into [`TicketError::Registry`] so
//! protocol code can react uniformly regardless of where tickets are stored.
//!
//! # Security Considerations
//!
//! A ticket that never existed and a ticket that expired are both reported as
//! [`TicketError::InvalidTicket`]. Callers must not try to tell them apart.

use std::fmt;

use crate::model::TicketKind;

/// Errors that can occur while creating, storing or validating tickets.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    /// The ticket has a different runtime kind than the caller expected, or
    /// no factory is registered for the requested kind.
    #[error("Invalid ticket class: {message}")]
    InvalidTicketClass {
        /// Description of the kind mismatch.
        message: String,
    },

    /// The ticket does not exist or is no longer valid.
    #[error("Ticket [{id}] is not valid")]
    InvalidTicket {
        /// The ticket id that was presented.
        id: String,
    },

    /// The factory could not mint a ticket.
    #[error("Ticket creation failed: {message}")]
    Creation {
        /// Description of why creation failed.
        message: String,
    },

    /// The ticket exists but cannot be used for the requested operation.
    #[error("Ticket validation failed: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The registry backend failed.
    #[error("Ticket registry error: {message}")]
    Registry {
        /// Description of the backend failure.
        message: String,
    },

    /// A ticket could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A ticket body could not be encrypted or decrypted.
    #[error("Cipher error: {message}")]
    Cipher {
        /// Description of the cipher failure.
        message: String,
    },

    /// The ticket configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl TicketError {
    /// Creates a new `InvalidTicketClass` error.
    #[must_use]
    pub fn invalid_ticket_class(message: impl Into<String>) -> Self {
        Self::InvalidTicketClass {
            message: message.into(),
        }
    }

    /// Creates an `InvalidTicketClass` error for a kind mismatch.
    #[must_use]
    pub fn kind_mismatch(id: &str, expected: TicketKind, actual: TicketKind) -> Self {
        Self::invalid_ticket_class(format!(
            "ticket [{id}] is a {actual}, expected {expected}"
        ))
    }

    /// Creates a new `InvalidTicket` error.
    #[must_use]
    pub fn invalid_ticket(id: impl Into<String>) -> Self {
        Self::InvalidTicket { id: id.into() }
    }

    /// Creates a new `Creation` error.
    #[must_use]
    pub fn creation(message: impl Into<String>) -> Self {
        Self::Creation {
            message: message.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Registry` error.
    #[must_use]
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Cipher` error.
    #[must_use]
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the ticket is absent or expired.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InvalidTicket { .. })
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTicketClass { .. }
                | Self::InvalidTicket { .. }
                | Self::Creation { .. }
                | Self::Validation { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Registry { .. }
                | Self::Serialization { .. }
                | Self::Cipher { .. }
                | Self::Configuration { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTicketClass { .. } => ErrorCategory::Ticket,
            Self::InvalidTicket { .. } => ErrorCategory::Ticket,
            Self::Creation { .. } => ErrorCategory::Creation,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Registry { .. } => ErrorCategory::Infrastructure,
            Self::Serialization { .. } => ErrorCategory::Infrastructure,
            Self::Cipher { .. } => ErrorCategory::Security,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of ticket errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown, expired or mistyped tickets.
    Ticket,
    /// Ticket minting failures.
    Creation,
    /// Validation failures on an existing ticket.
    Validation,
    /// Backend and serialization failures.
    Infrastructure,
    /// Encryption failures.
    Security,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket => write!(f, "ticket"),
            Self::Creation => write!(f, "creation"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Security => write!(f, "security"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
