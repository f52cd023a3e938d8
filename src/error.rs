//! Error types for dbguard

use thiserror::Error;

/// Errors that can occur in the audit core
#[derive(Debug, Error)]
pub enum AuditError {
    /// Audit log unwritable or unreadable. Non-fatal to the audited
    /// operation; surfaced only to the direct caller of the audit API.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed filter or report arguments, rejected before touching storage
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid SecurityConfig fields
    #[error("Configuration error: {0}")]
    Config(String),

    /// A restricted operation was refused in pre-check mode
    #[error("Restricted operation '{operation}' refused for user '{user}' (matched '{token}')")]
    RestrictedOperation {
        user: String,
        operation: String,
        token: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
