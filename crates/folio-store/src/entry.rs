//! Stored entries and protocol results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version written into the store file.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Outcome slot of an entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum StoredOutcome {
    /// Reserved; the owner is still executing.
    Pending,
    /// Terminal outcome, replayed to duplicates.
    Complete(Value),
}

/// One idempotency entry.
///
/// `input_hash` never changes after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Hash of the canonical request that created the entry.
    pub input_hash: String,
    /// Pending sentinel or terminal outcome.
    pub outcome: StoredOutcome,
    /// Creation (or completion) time, Unix milliseconds.
    pub created_at: u64,
}

impl StoreEntry {
    /// A fresh pending entry.
    pub fn pending(input_hash: &str, now_millis: u64) -> Self {
        Self {
            input_hash: input_hash.to_string(),
            outcome: StoredOutcome::Pending,
            created_at: now_millis,
        }
    }

    /// Whether the entry is still reserved.
    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, StoredOutcome::Pending)
    }

    /// Whether the entry has outlived `ttl` at `now_millis`.
    pub fn is_expired(&self, now_millis: u64, ttl: Duration) -> bool {
        now_millis.saturating_sub(self.created_at) >= ttl.as_millis() as u64
    }
}

/// Entries keyed by composite key.
pub type EntryMap = BTreeMap<String, StoreEntry>;

/// On-disk layout of the store file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreFile {
    /// Format version.
    #[serde(default)]
    pub version: u32,
    /// All entries.
    #[serde(default)]
    pub entries: EntryMap,
}

/// Result of a non-mutating `lookup`.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    /// No live entry.
    Miss,
    /// A live entry is still pending.
    Pending,
    /// A terminal outcome exists for this request.
    Replay(Value),
    /// The key is held by a different request.
    Conflict {
        /// Hash recorded for the key.
        stored_hash: String,
    },
}

/// Result of `reserve`.
#[derive(Clone, Debug, PartialEq)]
pub enum Reservation {
    /// The caller now owns the request and must execute it.
    Execute,
    /// Another caller owns the request and has not finished.
    Pending,
    /// A terminal outcome exists for this request.
    Replay(Value),
    /// The key is held by a different request.
    Conflict {
        /// Hash recorded for the key.
        stored_hash: String,
    },
}
