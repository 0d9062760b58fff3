//! Declarative block selectors.
//!
//! A selector locates blocks without addressing them by id:
//!
//! ```json
//! { "where": { "type": "paragraph", "textContains": "TODO" }, "nth": 2, "from": "end" }
//! ```
//!
//! Every provided predicate must hold. `nth` is 1-based and counted from the
//! front (`start`, the default) or the back (`end`) of the match list.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::FlatBlock;

/// Selector validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// `nth` must be a positive integer.
    #[error("nth must be a positive integer, got {0}")]
    InvalidNth(u32),
}

/// Which end of the match list `nth` counts from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountFrom {
    /// 1 = first match.
    #[default]
    Start,
    /// 1 = last match.
    End,
}

/// Match predicate over a flattened block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Where {
    /// Exact block type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    /// Case-insensitive substring of the block's plain text.
    #[serde(default, alias = "text_contains", skip_serializing_if = "Option::is_none")]
    pub text_contains: Option<String>,
    /// Exact direct parent.
    #[serde(default, alias = "parent_id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Where {
    /// Whether every provided predicate holds for `block`.
    pub fn matches(&self, block: &FlatBlock) -> bool {
        if let Some(ref block_type) = self.block_type {
            if &block.block_type != block_type {
                return false;
            }
        }
        if let Some(ref parent_id) = self.parent_id {
            if &block.parent_id != parent_id {
                return false;
            }
        }
        if let Some(ref needle) = self.text_contains {
            if !block.text.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// A declarative block predicate plus an optional positional disambiguator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Match predicate.
    #[serde(rename = "where", default)]
    pub predicate: Where,
    /// 1-based index into the match list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<u32>,
    /// Which end `nth` counts from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<CountFrom>,
}

impl Selector {
    /// A selector matching every block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an exact block type.
    pub fn with_type(mut self, block_type: impl Into<String>) -> Self {
        self.predicate.block_type = Some(block_type.into());
        self
    }

    /// Require a case-insensitive text substring.
    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.predicate.text_contains = Some(text.into());
        self
    }

    /// Require an exact direct parent.
    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.predicate.parent_id = Some(parent_id.into());
        self
    }

    /// Pick the `nth` match (1-based) from the front.
    pub fn nth(mut self, nth: u32) -> Self {
        self.nth = Some(nth);
        self
    }

    /// Count `nth` from the back of the match list.
    pub fn from_end(mut self) -> Self {
        self.from = Some(CountFrom::End);
        self
    }

    /// Check the selector is well formed.
    pub fn validate(&self) -> Result<(), SelectorError> {
        match self.nth {
            Some(0) => Err(SelectorError::InvalidNth(0)),
            _ => Ok(()),
        }
    }

    /// Whether `block` satisfies the predicate.
    pub fn matches(&self, block: &FlatBlock) -> bool {
        self.predicate.matches(block)
    }
}
