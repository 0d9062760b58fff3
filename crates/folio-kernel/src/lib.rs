//! # folio-kernel
//!
//! Safe, repeatable edits against a remote block-structured workspace.
//!
//! A remote write that times out may or may not have landed. The kernel
//! makes every write safe to retry:
//! - [`MutationCoordinator`] runs each logical request at most once, backed
//!   by the cross-process store in `folio-store`, and replays the stored
//!   outcome to duplicates
//! - after an ambiguous failure, the command's recovery probe reads the
//!   remote state back before deciding success or failure
//! - [`DocumentEditor`] addresses blocks by content selectors instead of ids,
//!   and replaces sibling ranges under an optimistic-concurrency fingerprint
//!
//! The remote side is the [`DocumentService`] trait; [`MemoryWorkspace`] is
//! the in-process implementation used by tests and local tooling.

pub mod blocks;
pub mod config;
pub mod coordinator;
pub mod editor;
pub mod error;
pub mod remote;
pub mod schema_cache;

pub use blocks::{
    Anchor, FlatTree, RangeOutcome, RangePlan, RangeSpec, ScanLimits, SelectorResolution,
    execute_plan, fingerprint, flatten, plan_range, resolve_selector, resolve_single,
};
pub use config::{CONFIG_ENV, ConfigError, FolioConfig};
pub use coordinator::{CoordinatorConfig, Mutation, MutationCoordinator, MutationOutcome};
pub use editor::{DocumentEditor, Placement};
pub use error::{FolioError, FolioResult, RemoteError};
pub use remote::{
    ChildPage, DocumentService, InsertPosition, MemoryWorkspace, PropertySchema, RemoteOp,
    RemotePage, RemoteResult,
};
pub use schema_cache::SchemaCache;
