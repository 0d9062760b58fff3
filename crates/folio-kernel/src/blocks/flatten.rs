//! Block tree flattening.
//!
//! The walk is iterative (an explicit stack, no recursion) and bounded by
//! `max_blocks`. Each node's children are fetched completely, across every
//! page, before the walk descends into any of them.

use std::collections::HashMap;

use folio_types::{FlatBlock, RemoteBlock};
use tracing::debug;

use crate::error::{FolioError, FolioResult};
use crate::remote::{DocumentService, MAX_PAGE_SIZE};

/// Bounds on a flatten walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanLimits {
    /// Fail once more than this many blocks have been seen.
    pub max_blocks: usize,
    /// Children requested per listing call.
    pub page_size: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_blocks: 2000,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

/// A scope flattened in depth-first pre-order.
#[derive(Clone, Debug, Default)]
pub struct FlatTree {
    pub scope_id: String,
    pub blocks: Vec<FlatBlock>,
    /// Parent id to ordered child ids.
    siblings: HashMap<String, Vec<String>>,
    index: HashMap<String, usize>,
}

impl FlatTree {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&FlatBlock> {
        self.index.get(id).map(|&i| &self.blocks[i])
    }

    /// Ordered child ids of `parent_id`.
    pub fn sibling_ids(&self, parent_id: &str) -> &[String] {
        self.siblings.get(parent_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Ordered children of `parent_id`.
    pub fn siblings(&self, parent_id: &str) -> Vec<&FlatBlock> {
        self.sibling_ids(parent_id)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    fn push(&mut self, block: FlatBlock) {
        self.index.insert(block.id.clone(), self.blocks.len());
        self.blocks.push(block);
    }
}

/// Every direct child of `parent_id`, following cursors to the end.
///
/// `budget` caps how many children may be returned; exceeding it yields
/// `None` so the caller can report the scan limit with its own scope.
pub async fn list_all_children(
    service: &dyn DocumentService,
    parent_id: &str,
    page_size: usize,
    budget: usize,
) -> FolioResult<Option<Vec<RemoteBlock>>> {
    let mut children = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = service
            .list_children(parent_id, cursor.as_deref(), page_size)
            .await?;
        children.extend(page.results);
        if children.len() > budget {
            return Ok(None);
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(Some(children)),
        }
    }
}

struct Frame {
    parent_id: String,
    children: Vec<RemoteBlock>,
    next: usize,
    depth: usize,
}

/// Flatten everything under `scope_id`.
pub async fn flatten(
    service: &dyn DocumentService,
    scope_id: &str,
    limits: &ScanLimits,
) -> FolioResult<FlatTree> {
    let scan_limit = || FolioError::ScanLimit {
        scope_id: scope_id.to_string(),
        max_blocks: limits.max_blocks,
    };

    let mut tree = FlatTree {
        scope_id: scope_id.to_string(),
        ..FlatTree::default()
    };
    let mut seen = 0usize;

    let top = list_all_children(service, scope_id, limits.page_size, limits.max_blocks)
        .await?
        .ok_or_else(scan_limit)?;
    seen += top.len();
    record_siblings(&mut tree, scope_id, &top);
    let mut stack = vec![Frame {
        parent_id: scope_id.to_string(),
        children: top,
        next: 0,
        depth: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(block) = frame.children.get(frame.next) else {
            stack.pop();
            continue;
        };
        let sibling_index = frame.next;
        frame.next += 1;

        let flat = FlatBlock::from_remote(block, &frame.parent_id, sibling_index, tree.len(), frame.depth);
        let descend = block.has_children.then(|| (block.id.clone(), frame.depth + 1));
        tree.push(flat);

        if let Some((id, depth)) = descend {
            let children = list_all_children(service, &id, limits.page_size, limits.max_blocks - seen)
                .await?
                .ok_or_else(scan_limit)?;
            seen += children.len();
            record_siblings(&mut tree, &id, &children);
            stack.push(Frame {
                parent_id: id,
                children,
                next: 0,
                depth,
            });
        }
    }

    debug!(scope_id, blocks = tree.len(), "flattened scope");
    Ok(tree)
}

fn record_siblings(tree: &mut FlatTree, parent_id: &str, children: &[RemoteBlock]) {
    tree.siblings.insert(
        parent_id.to_string(),
        children.iter().map(|b| b.id.clone()).collect(),
    );
}
