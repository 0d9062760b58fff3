//! Kernel error types.
//!
//! [`RemoteError`] is what the document service reports. [`FolioError`] is
//! what callers of the editor and coordinator see; every variant maps onto an
//! [`ErrorKind`].

use std::time::Duration;

use folio_store::StoreError;
use folio_types::{ErrorKind, SelectorError};
use thiserror::Error;

use crate::config::ConfigError;

/// Remote codes that mean "the write may or may not have happened".
const AMBIGUOUS_CODES: &[&str] = &[
    "internal_server_error",
    "service_unavailable",
    "rate_limited",
    "gateway_timeout",
    "timeout",
];

/// Error reported by the remote document service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("remote error (status {}, code {}): {message}", fmt_status(*status), code.as_deref().unwrap_or("none"))]
pub struct RemoteError {
    /// HTTP-like status, when the transport got one.
    pub status: Option<u16>,
    /// Machine-readable error code.
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

fn fmt_status(status: Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

impl RemoteError {
    pub fn new(status: Option<u16>, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(
            Some(404),
            Some("object_not_found"),
            format!("Could not find block with ID: {id}."),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(Some(400), Some("validation_error"), message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Some(409), Some("conflict_error"), message)
    }

    /// Client-side timeout: no status, no response.
    pub fn timeout() -> Self {
        Self::new(None, Some("timeout"), "request timed out")
    }

    pub fn server(status: u16) -> Self {
        Self::new(Some(status), Some("internal_server_error"), "unexpected server error")
    }

    pub fn rate_limited() -> Self {
        Self::new(Some(429), Some("rate_limited"), "rate limited")
    }

    /// Whether the remote side may or may not have applied the write.
    pub fn is_ambiguous(&self) -> bool {
        let status_ambiguous = self
            .status
            .is_some_and(|s| s == 408 || s == 429 || (500..600).contains(&s));
        let code_ambiguous = self
            .code
            .as_deref()
            .is_some_and(|c| AMBIGUOUS_CODES.contains(&c));
        status_ambiguous || code_ambiguous
    }

    /// Map onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match (self.status, self.code.as_deref()) {
            (Some(400 | 401 | 403 | 422), _) | (_, Some("validation_error")) => {
                ErrorKind::InvalidInput
            }
            (Some(404), _) | (_, Some("object_not_found")) => ErrorKind::NotFound,
            (Some(409), _) | (_, Some("conflict_error")) => ErrorKind::Conflict,
            _ if self.is_ambiguous() => ErrorKind::RetryableUpstream,
            _ => ErrorKind::InternalError,
        }
    }
}

/// Errors surfaced by folio operations.
#[derive(Debug, Error)]
pub enum FolioError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency failure.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Two different requests derived the same idempotency key.
    #[error("idempotency key collision for {command} (key {key}): stored request hash {stored_hash} differs")]
    KeyCollision {
        command: String,
        key: String,
        stored_hash: String,
    },

    /// Another caller owns the request and did not finish in time.
    #[error("{command} is already in progress (waited {:.1}s); retry later", waited.as_secs_f64())]
    InProgress { command: String, waited: Duration },

    /// The owning caller released its reservation while we were waiting.
    #[error("{command} was abandoned by a concurrent caller before completing; retry")]
    DuplicateUnresolved { command: String },

    /// Ambiguous remote failure with no confirmed outcome.
    #[error("outcome of {command} could not be confirmed; re-read before retrying ({source})")]
    Unconfirmed {
        command: String,
        #[source]
        source: RemoteError,
    },

    /// Flattening a scope visited more blocks than allowed.
    #[error("scope {scope_id} has more than {max_blocks} blocks; narrow the scope or raise scan.max_blocks")]
    ScanLimit { scope_id: String, max_blocks: usize },

    /// Range replacement inserted the new content but could not delete every
    /// original block.
    #[error("range deletion incomplete: {} deleted, {} remaining ({source})", deleted.len(), remaining.len())]
    PartialDelete {
        inserted: Vec<String>,
        deleted: Vec<String>,
        remaining: Vec<String>,
        #[source]
        source: Box<FolioError>,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid selector: {0}")]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FolioError {
    /// Map onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FolioError::InvalidInput(_) | FolioError::ScanLimit { .. } | FolioError::Selector(_) => {
                ErrorKind::InvalidInput
            }
            FolioError::NotFound(_) => ErrorKind::NotFound,
            FolioError::Conflict(_)
            | FolioError::KeyCollision { .. }
            | FolioError::PartialDelete { .. } => ErrorKind::Conflict,
            FolioError::InProgress { .. }
            | FolioError::DuplicateUnresolved { .. }
            | FolioError::Unconfirmed { .. } => ErrorKind::RetryableUpstream,
            FolioError::Remote(e) => e.kind(),
            FolioError::Store(e) => e.kind(),
            FolioError::Config(e) => e.kind(),
            FolioError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Whether this is a remote failure that leaves the write's fate unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, FolioError::Remote(e) if e.is_ambiguous())
    }

    /// Whether the remote reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Kernel result type.
pub type FolioResult<T> = Result<T, FolioError>;
