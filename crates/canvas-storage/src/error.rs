//! Storage error types for canvas-storage.
//!
//! [`StorageError`] separates invariant violations (immutable version,
//! dependency cycle) from backing-store faults. Store faults are split into
//! retryable connection errors and non-retryable errors; the retry layer in
//! [`crate::retry`] only ever retries the former.
//!
//! Absence is not an error: lookups return `Ok(None)`.

use std::io;

use thiserror::Error;

use canvas_core::id::{CanvasId, CustomerId, VersionId};
use canvas_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write was attempted against a version other than `draft`.
    #[error("version '{0}' is immutable")]
    ImmutableVersion(VersionId),

    /// `create_version` found no draft canvas to promote.
    #[error("canvas not found: customer={customer}, canvas={canvas}")]
    CanvasNotFound {
        customer: CustomerId,
        canvas: CanvasId,
    },

    /// Transient backing-store fault. Retried by the adapters.
    #[error("store connection error: {0}")]
    StoreConnection(String),

    /// Non-retryable backing-store fault, including exhausted retries.
    #[error("store error: {0}")]
    Store(String),

    /// A stored payload could not be decoded or failed its digest check.
    #[error("corrupted payload at '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    /// JSON serialization of an outgoing row failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Identifier, codec or dependency-graph error from canvas-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// Whether the retry layer may repeat the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::StoreConnection(_))
    }

    pub(crate) fn corrupted(key: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Corrupted {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                StorageError::StoreConnection(err.to_string())
            }
            _ => StorageError::Store(err.to_string()),
        }
    }
}

impl From<rusqlite_migration::Error> for StorageError {
    fn from(err: rusqlite_migration::Error) -> Self {
        StorageError::Store(format!("migration failed: {}", err))
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => StorageError::StoreConnection(err.to_string()),
            _ => StorageError::Store(err.to_string()),
        }
    }
}
