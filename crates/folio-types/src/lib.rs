//! Shared block, selector, and idempotency types for folio.
//!
//! This crate is the leaf of the workspace: it has **no internal folio
//! dependencies**. Everything that more than one crate needs to agree on lives
//! here: the error taxonomy, the remote block projection, selectors, and the
//! deterministic request hashing that idempotency keys are built from.
//!
//! # Key Types
//!
//! | Type                   | Purpose                                       |
//! |------------------------|-----------------------------------------------|
//! | [`ErrorKind`]          | Caller-facing failure taxonomy                |
//! | [`RemoteBlock`]        | A block as returned by the remote service     |
//! | [`FlatBlock`]          | Per-call flattened projection of a block      |
//! | [`Selector`]           | Declarative block predicate + positional pick |
//! | [`IdempotencyKey`]     | `command:bucket:hash` dedup key               |
//! | [`Clock`]              | Wall clock (system or manual for tests)       |

pub mod block;
pub mod clock;
pub mod error;
pub mod idempotency;
pub mod selector;

pub use block::{FlatBlock, RemoteBlock, payload_signature, plain_text_of};
pub use clock::Clock;
pub use error::ErrorKind;
pub use idempotency::{
    IdempotencyKey, canonical_json, composite_key, hash_hex, request_hash,
};
pub use selector::{CountFrom, Selector, SelectorError, Where};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
