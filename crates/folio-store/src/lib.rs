//! # folio-store
//!
//! Cross-process idempotency store for folio mutations.
//!
//! The store maps a composite key (idempotency key + command name) to either
//! a pending reservation or a terminal outcome. Entries age out after a TTL.
//! Any number of OS processes may share one store file; every access is
//! serialized by an advisory lock file next to it.
//!
//! - [`IdempotencyStore`] - the `lookup`/`reserve`/`complete`/`release` protocol
//! - [`StoreBackend`] - persistence seam ([`MemoryBackend`], [`FileBackend`])
//! - [`FileLock`] - `flock` on a sibling lock file, with jittered backoff

pub mod backend;
pub mod entry;
pub mod error;
pub mod lock;
mod store;

pub use backend::{ExclusiveAccess, FileBackend, MemoryBackend, StoreBackend};
pub use entry::{EntryMap, Lookup, Reservation, StoreEntry, StoredOutcome};
pub use error::{StoreError, StoreResult};
pub use lock::{FileLock, LockConfig};
pub use store::{IdempotencyStore, StoreConfig};
