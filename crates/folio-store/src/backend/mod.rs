//! Persistence backends for the idempotency store.
//!
//! A backend owns the bytes; the store owns the protocol. The only way to
//! read or write entries is through an [`ExclusiveAccess`] token obtained from
//! [`StoreBackend::acquire`], and the token releases its lock when dropped, so
//! every read-modify-write sequence runs under the lock on every exit path.
//!
//! - [`MemoryBackend`] - in-process map, for tests and single-process use
//! - [`FileBackend`] - JSON file guarded by an advisory lock file, shared
//!   between processes

mod file;
mod memory;

use std::fmt;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::entry::EntryMap;
use crate::error::StoreResult;

/// Scoped exclusive access to the stored entries.
pub trait ExclusiveAccess {
    /// Read every stored entry, expired ones included.
    fn read(&mut self) -> StoreResult<EntryMap>;

    /// Replace the stored entries atomically.
    fn write(&mut self, entries: &EntryMap) -> StoreResult<()>;
}

/// Key-value persistence behind the idempotency store.
pub trait StoreBackend: Send + Sync + fmt::Debug {
    /// Take exclusive access. Blocks (bounded) while another holder has it.
    fn acquire(&self) -> StoreResult<Box<dyn ExclusiveAccess + '_>>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Release any resources. Further use is a caller error.
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
