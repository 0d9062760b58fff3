//! Store error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use folio_types::ErrorKind;
use thiserror::Error;

/// Errors raised by the idempotency store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store lock could not be acquired within the wait budget.
    #[error("timed out acquiring store lock {} after {:.2}s ({attempts} attempts)", path.display(), waited.as_secs_f64())]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
        /// Number of acquisition attempts.
        attempts: u32,
    },

    /// `complete` was called with a request hash that differs from the stored one.
    #[error("request hash mismatch for {command}: stored {stored}, given {given}")]
    HashMismatch {
        /// Command of the entry.
        command: String,
        /// Hash recorded at reservation.
        stored: String,
        /// Hash supplied by the caller.
        given: String,
    },

    /// The backing file could not be parsed.
    #[error("store file {} is corrupt: {reason}", path.display())]
    Corrupt {
        /// Store file path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The store was closed.
    #[error("idempotency store is closed")]
    Closed,

    /// I/O error.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Map onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::LockTimeout { .. } => ErrorKind::RetryableUpstream,
            _ => ErrorKind::InternalError,
        }
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;
