//! Append-only audit events.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use folio_types::{ErrorKind, hash_hex};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One record per coordinated mutation, whatever the branch taken.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Emission time, Unix milliseconds.
    pub ts: u64,
    /// Command name (`block.append`, `range.replace`, ...).
    pub command: String,
    /// Hashed idempotency key (see [`key_hash`]).
    pub key_hash: String,
    /// Target identifiers (parent, block, page ids).
    #[serde(default)]
    pub targets: Vec<String>,
    /// Whether the caller saw success.
    pub ok: bool,
    /// Outcome came from the store, not a fresh execution.
    #[serde(default)]
    pub replayed: bool,
    /// Outcome was confirmed by recovery after an ambiguous failure.
    #[serde(default)]
    pub recovered: bool,
    /// The outcome could not be persisted for replay.
    #[serde(default)]
    pub persistence_degraded: bool,
    /// Failure classification when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Wall time spent in the coordinator.
    pub duration_ms: u64,
}

/// First 16 hex chars of sha256 of the idempotency key. Raw keys stay out of
/// the audit log.
pub fn key_hash(key: &str) -> String {
    let mut digest = hash_hex(key);
    digest.truncate(16);
    digest
}

/// Audit sink failure.
#[derive(Debug, Error)]
pub enum AuditError {
    /// I/O error writing the log.
    #[error("audit I/O error: {0}")]
    Io(#[from] io::Error),
    /// Event could not be encoded.
    #[error("audit encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AuditError {
    /// Audit failures are internal by nature.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InternalError
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends events as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    /// Log to `path`, creating parent directories as needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Collects events in memory. For tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Discards events (auditing disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}
