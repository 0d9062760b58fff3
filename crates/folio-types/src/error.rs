//! The caller-facing error taxonomy.
//!
//! Every error type in the workspace maps onto one of these kinds so callers
//! (and the audit trail) only ever need to branch on five shapes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Classification of a failure.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ErrorKind {
    /// Caller error. Never retried.
    InvalidInput,
    /// The addressed object does not exist.
    NotFound,
    /// Optimistic-concurrency failure or idempotency key collision.
    Conflict,
    /// Lock contention, an in-flight duplicate, or an unconfirmed outcome.
    /// Safe to retry.
    RetryableUpstream,
    /// Store corruption or a broken invariant.
    InternalError,
}

impl ErrorKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RetryableUpstream)
    }
}
