//! Error types for tunetrees-practice
//!
//! Every asynchronous operation converts failures into one of these
//! variants at its own boundary; the coordinator then decides whether a
//! rollback and a notification are due.

use thiserror::Error;

/// Main error type for the practice service
#[derive(Error, Debug)]
pub enum Error {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors raised by the shared library
    #[error(transparent)]
    Common(#[from] tunetrees_common::Error),

    /// Queue snapshot retrieval failed (network or parse)
    #[error("Snapshot fetch failed: {0}")]
    Fetch(String),

    /// A tentative grade could not be persisted or discarded
    #[error("Staging failed: {0}")]
    Staging(String),

    /// Batch submission failed; nothing was committed
    #[error("Submission failed: {0}")]
    Submit(String),

    /// Session view-state could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A backend call exceeded the configured bound
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Grade string is not one of again/hard/good/easy
    #[error("Invalid grade: {0}")]
    InvalidGrade(String),

    /// Scheduling provider missing or rejected the input
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Serialization of persisted JSON failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type using the practice Error
pub type Result<T> = std::result::Result<T, Error>;
