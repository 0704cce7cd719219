//! Storage error handling
//!
//! Provides typed errors for storage operations with descriptive messages
//! and recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A store was used before `open()` completed
    #[error("Store is not initialized: call open() first")]
    NotInitialized,

    /// The store is already open and cannot accept this operation
    #[error("Store is already open")]
    AlreadyOpen,

    /// Blob (or other keyed entry) not found
    #[error("Not found: '{id}'")]
    NotFound { id: String },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Snapshot named by the version marker exists but cannot be loaded
    #[error("Snapshot '{name}' is corrupted: {details}")]
    CorruptSnapshot { name: String, details: String },

    /// Version marker text is not an integer
    #[error("Invalid version marker '{0}'")]
    InvalidVersionMarker(String),

    /// Dump stream is malformed
    #[error("Invalid dump stream: {0}")]
    Dump(String),

    /// Media or value conversion failed
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Operation not allowed on this node or in this state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON attribute (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => StoreError::NotFound {
                id: path.display().to_string(),
            },
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Check whether this is a `NotFound` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DiskFull { .. } => Some("Free up disk space and try again."),
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            StoreError::CorruptSnapshot { .. } => {
                Some("Restore the store from a dump, or remove the version marker to start fresh.")
            }
            StoreError::NotInitialized => Some("Open the store before using it."),
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
