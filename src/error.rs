//! Error types for the segforge library.
//!
//! All fallible operations return [`SegforgeError`] through the crate-wide
//! [`Result`] alias. The three domain failures of the engine have dedicated
//! variants:
//!
//! - [`SegforgeError::Configuration`]: a parallelism, memory budget or index
//!   option is out of range. Raised before any job starts.
//! - [`SegforgeError::IoFlush`]: a segment could not be written durably. Fatal
//!   to the owning build job.
//! - [`SegforgeError::MergeFailure`]: a merge could not complete. The segment
//!   set is left unchanged and the merge may be retried later.
//!
//! # Examples
//!
//! ```
//! use segforge::error::{Result, SegforgeError};
//!
//! fn check_parallelism(value: i64) -> Result<usize> {
//!     if value < 0 {
//!         return Err(SegforgeError::configuration("parallelism must be >= 0"));
//!     }
//!     Ok(value as usize)
//! }
//!
//! assert!(check_parallelism(-1).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for segforge operations.
#[derive(Error, Debug)]
pub enum SegforgeError {
    /// Invalid parallelism, memory budget or index option.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Durable write of a segment failed.
    #[error("I/O flush error: {0}")]
    IoFlush(String),

    /// A merge could not complete.
    #[error("Merge failure: {0}")]
    MergeFailure(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Data on storage does not match what was written.
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Thread join errors
    #[error("Thread join error: {0}")]
    ThreadJoinError(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SegforgeError.
pub type Result<T> = std::result::Result<T, SegforgeError>;

impl SegforgeError {
    /// Create a new configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Configuration(msg.into())
    }

    /// Create a new flush error.
    pub fn io_flush<S: Into<String>>(msg: S) -> Self {
        SegforgeError::IoFlush(msg.into())
    }

    /// Create a new merge failure.
    pub fn merge_failure<S: Into<String>>(msg: S) -> Self {
        SegforgeError::MergeFailure(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Corrupted(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Serialization(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SegforgeError::OperationCancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Other(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        SegforgeError::Other(format!("Internal error: {}", msg.into()))
    }

    /// Whether this error only reports that the job was cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SegforgeError::OperationCancelled(_))
    }
}

impl From<bincode::Error> for SegforgeError {
    fn from(err: bincode::Error) -> Self {
        SegforgeError::Serialization(err.to_string())
    }
}
