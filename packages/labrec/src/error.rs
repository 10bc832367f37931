//! Error types for the record store and its index

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Store is closed: {0}")]
    StoreClosed(PathBuf),

    #[error("Timed out after {timeout_ms}ms waiting for lock on {what}")]
    LockTimeout { what: String, timeout_ms: u128 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Operation not allowed in read-only mode")]
    ReadOnlyMode,

    #[error("Version '{0}' is read-only")]
    ReadOnlyVersion(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Unknown reference class: {0}")]
    UnknownReferenceClass(String),

    #[error("UID '{0}' is not indexed")]
    UidNotFound(String),

    #[error("Option not found: {0}")]
    OptionNotFound(String),

    #[error("Signature error: {0}")]
    Signature(String),
}

impl StoreError {
    /// Stable error code, suitable for the `errors` table and for callers
    /// that branch on failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NodeNotFound(_) => "NODE_NOT_FOUND",
            StoreError::NodeExists(_) => "NODE_EXISTS",
            StoreError::FileNotFound(_) => "FILE_NOT_FOUND",
            StoreError::StoreClosed(_) => "STORE_CLOSED",
            StoreError::LockTimeout { .. } => "LOCK_TIMEOUT",
            StoreError::InvalidFormat(_) => "INVALID_FORMAT",
            StoreError::InvalidQuery(_) => "INVALID_QUERY",
            StoreError::ReadOnlyMode => "READ_ONLY_MODE",
            StoreError::ReadOnlyVersion(_) => "READ_ONLY_VERSION",
            StoreError::VersionNotFound(_) => "VERSION_NOT_FOUND",
            StoreError::UnknownReferenceClass(_) => "UNKNOWN_REFERENCE_CLASS",
            StoreError::UidNotFound(_) => "UID_NOT_FOUND",
            StoreError::OptionNotFound(_) => "OPTION_NOT_FOUND",
            StoreError::Signature(_) => "SIGNATURE",
            StoreError::Sql(_) => "SQL_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the error should abort the caller rather than be recorded
    /// and skipped. Index scans stop on these, except a `FileNotFound` for
    /// a file that vanished mid-scan, which is skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. } | StoreError::FileNotFound(_) | StoreError::InvalidQuery(_)
        )
    }
}
