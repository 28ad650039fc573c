//! Error types for TestGrid

use thiserror::Error;

/// Result type alias using TestGrid Error
pub type Result<T> = std::result::Result<T, Error>;

/// TestGrid error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {id}")]
    ResourceNotFound { id: String },

    #[error("Resource already exists: {id}")]
    DuplicateResource { id: String },

    #[error("Resource operation failed: {0}")]
    ResourceOperation(String),

    #[error("Health check failed for {id}: {reason}")]
    HealthCheck { id: String, reason: String },

    #[error("Element not found: {strategy}={selector}")]
    ElementNotFound { strategy: String, selector: String },

    #[error("Timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Data validation failed at row {row}: {reason}")]
    DataValidation { row: usize, reason: String },

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error represents an expected-vs-actual business failure
    /// rather than an infrastructure fault. The engine records these as a
    /// `failed` step; everything else becomes `error`.
    pub fn is_business_failure(&self) -> bool {
        matches!(
            self,
            Error::AssertionFailed(_) | Error::ElementNotFound { .. } | Error::Timeout { .. }
        )
    }
}
