//! In-memory store backend.
//!
//! Used for tests and for callers that only need in-process deduplication.
//! All data is lost when dropped.

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{ExclusiveAccess, StoreBackend};
use crate::entry::EntryMap;
use crate::error::StoreResult;

/// In-memory backend. Thread-safe via an internal mutex.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<EntryMap>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw entries held, expired ones included.
    pub fn raw_len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct MemoryAccess<'a> {
    guard: MutexGuard<'a, EntryMap>,
}

impl ExclusiveAccess for MemoryAccess<'_> {
    fn read(&mut self) -> StoreResult<EntryMap> {
        Ok(self.guard.clone())
    }

    fn write(&mut self, entries: &EntryMap) -> StoreResult<()> {
        *self.guard = entries.clone();
        Ok(())
    }
}

impl StoreBackend for MemoryBackend {
    fn acquire(&self) -> StoreResult<Box<dyn ExclusiveAccess + '_>> {
        Ok(Box::new(MemoryAccess {
            guard: self.entries.lock(),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
