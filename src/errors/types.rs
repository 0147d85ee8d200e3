//! Error type definitions for the crawl orchestrator
//!
//! Every core operation returns one of these typed errors so the
//! presentation layer can render the exact failure reason without parsing
//! free-text messages.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Malformed input: bad priority range, unknown spider id, bad cron expression
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Operation not valid for the entity's current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// No active, healthy proxy qualifies. Back-pressure, not a fatal error.
    #[error("Proxy pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A stored column could not be decoded into its domain type
    #[error("Failed to decode {table}.{column}: {message}")]
    Decode {
        table: String,
        column: String,
        message: String,
    },

    /// JSON columns that fail to (de)serialize
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Migration failures
    #[error("Migration failed: {version} - {message}")]
    MigrationFailed { version: String, message: String },
}

impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an invalid state error with a custom message
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted<S: Into<String>>(message: S) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Repository(_) => "repository_error",
            AppError::Validation { .. } => "validation_failed",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::PoolExhausted { .. } => "pool_exhausted",
            AppError::NotFound { .. } => "not_found",
            AppError::Configuration { .. } => "configuration_error",
            AppError::Internal { .. } => "internal_error",
        }
    }

    /// Whether the caller may retry the same operation later without
    /// changing its input.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::PoolExhausted { .. } | AppError::Database(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Repository(RepositoryError::SerializationFailed(err))
    }
}

impl RepositoryError {
    /// Create a decode error for a table column
    pub fn decode<T: Into<String>, C: Into<String>, M: Into<String>>(
        table: T,
        column: C,
        message: M,
    ) -> Self {
        Self::Decode {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AppError::validation("x").code(), "validation_failed");
        assert_eq!(AppError::invalid_state("x").code(), "invalid_state");
        assert_eq!(AppError::pool_exhausted("x").code(), "pool_exhausted");
        assert_eq!(AppError::not_found("job", 7).code(), "not_found");
    }

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("request", 42);
        assert_eq!(err.to_string(), "Not found: request with id 42");
    }

    #[test]
    fn test_pool_exhausted_is_transient() {
        assert!(AppError::pool_exhausted("none").is_transient());
        assert!(!AppError::validation("bad").is_transient());
        assert!(!AppError::invalid_state("bad").is_transient());
    }
}
