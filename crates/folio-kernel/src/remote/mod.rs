//! The remote document service seam.
//!
//! The service is opaque: page and block CRUD, cursor-paginated child
//! listing, search, and per-container property schemas. Everything folio
//! does to a workspace goes through [`DocumentService`], so tests swap in
//! [`MemoryWorkspace`].
//!
//! Block payloads are JSON objects of the form `{"type": t, t: {...}}`.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use folio_types::RemoteBlock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::{MemoryWorkspace, RemoteOp};

use crate::error::RemoteError;

/// Largest page the service will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Remote result type.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// One page of a child listing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildPage {
    pub results: Vec<RemoteBlock>,
    /// Continuation cursor; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Where appended children go among the parent's existing children.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "block_id", rename_all = "snake_case")]
pub enum InsertPosition {
    #[default]
    End,
    Start,
    /// Directly after the given sibling.
    After(String),
}

/// A page as reported by the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemotePage {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    /// Property name to value.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub last_edited_time: String,
    #[serde(default)]
    pub archived: bool,
}

/// Property names (and their types) a container accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub container_id: String,
    /// Property name to property type.
    pub properties: BTreeMap<String, String>,
}

impl PropertySchema {
    pub fn knows(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// The names in `names` this schema does not define, in input order.
    pub fn unknown<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| !self.knows(name))
            .map(str::to_string)
            .collect()
    }
}

/// Remote page/block store.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Fetch one block. Archived blocks are not found.
    async fn retrieve_block(&self, block_id: &str) -> RemoteResult<RemoteBlock>;

    /// One page of direct children of a page or block.
    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> RemoteResult<ChildPage>;

    /// Create `children` under `parent_id`. Returns the created top-level blocks.
    async fn append_children(
        &self,
        parent_id: &str,
        children: &[Value],
        position: &InsertPosition,
    ) -> RemoteResult<Vec<RemoteBlock>>;

    /// Update a block's type-specific content.
    async fn update_block(&self, block_id: &str, payload: &Value) -> RemoteResult<RemoteBlock>;

    /// Archive a block.
    async fn delete_block(&self, block_id: &str) -> RemoteResult<RemoteBlock>;

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        properties: &Value,
        children: &[Value],
    ) -> RemoteResult<RemotePage>;

    /// Set page properties. Unknown property names are rejected.
    async fn update_page(&self, page_id: &str, properties: &Value) -> RemoteResult<RemotePage>;

    /// Pages whose title contains `query`.
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemotePage>>;

    async fn retrieve_schema(&self, container_id: &str) -> RemoteResult<PropertySchema>;
}
