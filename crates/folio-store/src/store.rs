//! The idempotency protocol: lookup / reserve / complete / release.
//!
//! Every operation runs under the backend's exclusive access. Mutating
//! operations read the full map, prune entries older than the TTL, apply
//! their change, and write back atomically. `lookup` never writes, so an
//! expired entry stays on disk (invisible) until the next mutating access
//! prunes it.
//!
//! Per logical request the entry moves `absent -> pending -> complete`.
//! `release` is the only way back to `absent` and only from `pending`. A
//! complete entry never reverts to pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use folio_types::{Clock, composite_key};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{MemoryBackend, StoreBackend};
use crate::entry::{EntryMap, Lookup, Reservation, StoreEntry, StoredOutcome};
use crate::error::{StoreError, StoreResult};

/// Store-level settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Entries older than this are invisible and pruned.
    pub ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(180),
        }
    }
}

/// Persistent, TTL-pruned map from composite key to outcome.
#[derive(Debug)]
pub struct IdempotencyStore {
    backend: Box<dyn StoreBackend>,
    ttl: Duration,
    clock: Clock,
    closed: AtomicBool,
}

impl IdempotencyStore {
    /// Open a store over `backend`.
    pub fn open(backend: impl StoreBackend + 'static, config: StoreConfig) -> Self {
        debug!(backend = %backend.describe(), ttl_secs = config.ttl.as_secs(), "idempotency store opened");
        Self {
            backend: Box::new(backend),
            ttl: config.ttl,
            clock: Clock::system(),
            closed: AtomicBool::new(false),
        }
    }

    /// An in-memory store.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::open(MemoryBackend::new(), config)
    }

    /// Replace the clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Entry TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Backend location, for logs.
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Close the store. Later operations fail with [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close()
    }

    /// Non-mutating read of the entry for `(key, command)`.
    pub fn lookup(&self, key: &str, command: &str, input_hash: &str) -> StoreResult<Lookup> {
        let composite = composite_key(key, command);
        self.read(|entries, now| {
            Ok(match live_entry(entries, &composite, now, self.ttl) {
                None => Lookup::Miss,
                Some(entry) if entry.input_hash != input_hash => Lookup::Conflict {
                    stored_hash: entry.input_hash.clone(),
                },
                Some(entry) => match &entry.outcome {
                    StoredOutcome::Pending => Lookup::Pending,
                    StoredOutcome::Complete(value) => Lookup::Replay(value.clone()),
                },
            })
        })
    }

    /// Create a pending entry unless one already exists.
    pub fn reserve(&self, key: &str, command: &str, input_hash: &str) -> StoreResult<Reservation> {
        let composite = composite_key(key, command);
        self.mutate(|entries, now| {
            let result = match entries.get(&composite) {
                None => {
                    entries.insert(composite.clone(), StoreEntry::pending(input_hash, now));
                    return Ok((Reservation::Execute, true));
                }
                Some(entry) if entry.input_hash != input_hash => Reservation::Conflict {
                    stored_hash: entry.input_hash.clone(),
                },
                Some(entry) => match &entry.outcome {
                    StoredOutcome::Pending => Reservation::Pending,
                    StoredOutcome::Complete(value) => Reservation::Replay(value.clone()),
                },
            };
            Ok((result, false))
        })
    }

    /// Record the terminal outcome for a reserved request.
    ///
    /// Overwrites the pending (or existing) entry and refreshes its timestamp.
    /// A stored hash that differs from `input_hash` is a concurrency bug and
    /// leaves the entry untouched.
    pub fn complete(
        &self,
        key: &str,
        command: &str,
        input_hash: &str,
        outcome: &Value,
    ) -> StoreResult<()> {
        let composite = composite_key(key, command);
        self.mutate(|entries, now| {
            if let Some(entry) = entries.get(&composite) {
                if entry.input_hash != input_hash {
                    return Err(StoreError::HashMismatch {
                        command: command.to_string(),
                        stored: entry.input_hash.clone(),
                        given: input_hash.to_string(),
                    });
                }
            }
            entries.insert(
                composite.clone(),
                StoreEntry {
                    input_hash: input_hash.to_string(),
                    outcome: StoredOutcome::Complete(outcome.clone()),
                    created_at: now,
                },
            );
            Ok(((), true))
        })
    }

    /// Drop a pending, hash-matched reservation so a retry can execute.
    ///
    /// Returns whether an entry was removed. Complete entries and entries
    /// owned by a different request are left alone.
    pub fn release(&self, key: &str, command: &str, input_hash: &str) -> StoreResult<bool> {
        let composite = composite_key(key, command);
        self.mutate(|entries, _now| {
            let removable = entries
                .get(&composite)
                .is_some_and(|entry| entry.is_pending() && entry.input_hash == input_hash);
            if removable {
                entries.remove(&composite);
            } else if entries.contains_key(&composite) {
                warn!(command, "release skipped: entry is complete or owned by another request");
            }
            Ok((removable, removable))
        })
    }

    /// Snapshot of every stored entry, expired ones included.
    pub fn entries(&self) -> StoreResult<Vec<(String, StoreEntry)>> {
        self.read(|entries, _now| Ok(entries.clone().into_iter().collect()))
    }

    /// Run a prune pass now. Returns how many entries were removed.
    pub fn prune(&self) -> StoreResult<usize> {
        let mut removed = 0;
        self.mutate(|entries, now| {
            removed = prune_expired(entries, now, self.ttl);
            Ok(((), false))
        })?;
        Ok(removed)
    }

    /// Whether `entry` is past the TTL right now.
    pub fn is_expired(&self, entry: &StoreEntry) -> bool {
        entry.is_expired(self.clock.now_millis(), self.ttl)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn read<T>(&self, f: impl FnOnce(&EntryMap, u64) -> StoreResult<T>) -> StoreResult<T> {
        self.ensure_open()?;
        let mut access = self.backend.acquire()?;
        let entries = access.read()?;
        f(&entries, self.clock.now_millis())
    }

    /// Read-prune-modify-write under the lock. `f` reports whether it changed
    /// anything; the map is written back if it did or if pruning removed entries.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut EntryMap, u64) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        self.ensure_open()?;
        let mut access = self.backend.acquire()?;
        let mut entries = access.read()?;
        let now = self.clock.now_millis();
        let pruned = prune_expired(&mut entries, now, self.ttl);
        let (result, changed) = f(&mut entries, now)?;
        if changed || pruned > 0 {
            access.write(&entries)?;
        }
        if pruned > 0 {
            debug!(pruned, "pruned expired idempotency entries");
        }
        Ok(result)
    }
}

fn live_entry<'a>(
    entries: &'a EntryMap,
    composite: &str,
    now: u64,
    ttl: Duration,
) -> Option<&'a StoreEntry> {
    entries
        .get(composite)
        .filter(|entry| !entry.is_expired(now, ttl))
}

fn prune_expired(entries: &mut EntryMap, now: u64, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now, ttl));
    before - entries.len()
}
