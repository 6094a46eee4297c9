//! Error types for the Quiver engine.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! the [`QuiverError`] enum. Request-facing failures (validation, missing
//! resources, expired cursors) are kept apart from internal ones (storage,
//! corruption, builds) so a serving layer can map them onto its own status codes
//! through [`QuiverError::code`].
//!
//! # Examples
//!
//! ```
//! use quiver::error::{QuiverError, Result};
//!
//! fn check_k(k: usize) -> Result<()> {
//!     if k == 0 {
//!         return Err(QuiverError::validation("k must be greater than zero"));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_k(0).unwrap_err();
//! assert!(err.is_validation());
//! assert_eq!(err.code(), "ValidationException");
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Quiver operations.
#[derive(Error, Debug)]
pub enum QuiverError {
    /// I/O errors from the local filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed request arguments (bad K, bad dimension, limits exceeded, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A vector whose length differs from the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A filter expression that cannot be compiled.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Referenced index, segment or key does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (index creation with a taken name).
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Pagination cursor invalidated by compaction.
    #[error("Cursor expired: {0}")]
    CursorExpired(String),

    /// Storage backend errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted object failed integrity checks.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// ANN structure construction failed.
    #[error("Index build error: {0}")]
    Build(String),

    /// Binary (de)serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller gave up waiting for the result.
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with QuiverError.
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Create a new validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        QuiverError::Validation(msg.into())
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        QuiverError::DimensionMismatch { expected, actual }
    }

    /// Create a new invalid filter error.
    pub fn invalid_filter<S: Into<String>>(msg: S) -> Self {
        QuiverError::InvalidFilter(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuiverError::NotFound(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        QuiverError::AlreadyExists(msg.into())
    }

    /// Create a new cursor expired error.
    pub fn cursor_expired<S: Into<String>>(msg: S) -> Self {
        QuiverError::CursorExpired(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        QuiverError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        QuiverError::Corrupt(msg.into())
    }

    /// Create a new build error.
    pub fn build<S: Into<String>>(msg: S) -> Self {
        QuiverError::Build(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        QuiverError::OperationCancelled(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        QuiverError::Validation(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        QuiverError::Other(format!("Internal error: {}", msg.into()))
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        QuiverError::Other(msg.into())
    }

    /// Whether this error rejects a request before any state change.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QuiverError::Validation(_)
                | QuiverError::DimensionMismatch { .. }
                | QuiverError::InvalidFilter(_)
        )
    }

    /// Exception name reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            QuiverError::Validation(_)
            | QuiverError::DimensionMismatch { .. }
            | QuiverError::InvalidFilter(_)
            | QuiverError::CursorExpired(_) => "ValidationException",
            QuiverError::NotFound(_) => "ResourceNotFoundException",
            QuiverError::AlreadyExists(_) => "ConflictException",
            QuiverError::OperationCancelled(_) => "RequestTimeoutException",
            _ => "InternalServerException",
        }
    }
}

impl From<bincode::Error> for QuiverError {
    fn from(err: bincode::Error) -> Self {
        QuiverError::Serialization(err.to_string())
    }
}
