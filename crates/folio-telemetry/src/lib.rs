//! Tracing setup and the audit trail for folio.
//!
//! # Logging
//!
//! Binaries call [`init_tracing`] once at startup. Output goes to stderr
//! (stdout is reserved for command output) and is filtered with `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=folio_kernel=debug,folio_store=debug folio store list
//! ```
//!
//! # Audit
//!
//! Every coordinated mutation emits one [`AuditEvent`]. Sinks are best-effort:
//! the coordinator logs and swallows [`AuditError`]s so auditing can never
//! change a mutation's outcome.

mod audit;

pub use audit::{
    AuditError, AuditEvent, AuditSink, JsonlAuditSink, MemoryAuditSink, NullAuditSink, key_hash,
};

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global fmt subscriber: stderr, no ANSI, `RUST_LOG` filtering
/// on top of `default_level`.
///
/// Returns `false` if a global subscriber was already installed (tests and
/// embedders may have set their own).
pub fn init_tracing(default_level: Level) -> bool {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Whether verbose logging was requested through `FOLIO_DEBUG`.
pub fn debug_requested() -> bool {
    std::env::var("FOLIO_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
