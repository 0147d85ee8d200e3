//! Centralized error handling for the crawl orchestrator
//!
//! # Error Categories
//!
//! - **Validation**: malformed input, rejected synchronously, never retried
//! - **InvalidState**: the entity's current state forbids the operation
//! - **PoolExhausted**: no eligible proxy; transient back-pressure
//! - **NotFound**: unknown entity id
//! - **Database / Repository**: storage failures and row decoding issues

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;
