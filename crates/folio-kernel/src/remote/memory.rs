//! In-memory document service.
//!
//! Used for tests and dry runs. Pages, nested blocks, cursor pagination and
//! property schemas behave like the real service closely enough to exercise
//! selectors, range plans and recovery. Faults can be injected per operation,
//! optionally after the write has been applied, to simulate a response lost
//! on the way back.

use std::collections::HashMap;

use async_trait::async_trait;
use folio_types::{RemoteBlock, plain_text_of};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    ChildPage, DocumentService, InsertPosition, MAX_PAGE_SIZE, PropertySchema, RemotePage,
    RemoteResult,
};
use crate::error::RemoteError;

/// Operations that can be counted and faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    RetrieveBlock,
    ListChildren,
    AppendChildren,
    UpdateBlock,
    DeleteBlock,
    CreatePage,
    UpdatePage,
    Search,
    RetrieveSchema,
}

#[derive(Debug)]
struct Fault {
    op: RemoteOp,
    target: Option<String>,
    error: RemoteError,
    apply_first: bool,
}

#[derive(Debug, Default)]
struct State {
    blocks: HashMap<String, RemoteBlock>,
    pages: HashMap<String, RemotePage>,
    children: HashMap<String, Vec<String>>,
    schemas: HashMap<String, PropertySchema>,
    tick: u64,
    faults: Vec<Fault>,
    calls: HashMap<RemoteOp, usize>,
}

impl State {
    fn stamp(&mut self) -> String {
        self.tick += 1;
        format!("t{:010}", self.tick)
    }

    fn take_fault(&mut self, op: RemoteOp, target: &str) -> Option<Fault> {
        let idx = self.faults.iter().position(|f| {
            f.op == op && f.target.as_deref().is_none_or(|t| t == target)
        })?;
        Some(self.faults.remove(idx))
    }

    fn snapshot(&self, block: &RemoteBlock) -> RemoteBlock {
        let mut block = block.clone();
        block.has_children = self.children.get(&block.id).is_some_and(|c| !c.is_empty());
        block
    }

    fn live_block(&self, id: &str) -> RemoteResult<RemoteBlock> {
        match self.blocks.get(id) {
            Some(block) if !block.archived => Ok(self.snapshot(block)),
            _ => Err(RemoteError::not_found(id)),
        }
    }

    fn is_container(&self, id: &str) -> bool {
        self.pages.get(id).is_some_and(|p| !p.archived)
            || self.blocks.get(id).is_some_and(|b| !b.archived)
    }

    fn check_properties(&self, container_id: &str, properties: &Map<String, Value>) -> RemoteResult<()> {
        let Some(schema) = self.schemas.get(container_id) else {
            return Ok(());
        };
        match properties.keys().find(|name| !schema.knows(name)) {
            Some(name) => Err(RemoteError::validation(format!(
                "{name} is not a property that exists."
            ))),
            None => Ok(()),
        }
    }

    /// Create one block (and any nested children) and return its id. The
    /// caller places the id in the parent's child list.
    fn create_block(&mut self, parent_id: &str, payload: &ParsedPayload) -> String {
        let id = Uuid::new_v4().to_string();
        let block = RemoteBlock {
            id: id.clone(),
            block_type: payload.block_type.clone(),
            parent_id: Some(parent_id.to_string()),
            has_children: false,
            last_edited_time: self.stamp(),
            archived: false,
            content: payload.content.clone(),
        };
        self.blocks.insert(id.clone(), block);

        let nested: Vec<String> = payload
            .children
            .iter()
            .map(|child| self.create_block(&id, child))
            .collect();
        if !nested.is_empty() {
            self.children.insert(id.clone(), nested);
        }
        id
    }
}

#[derive(Debug)]
struct ParsedPayload {
    block_type: String,
    content: Value,
    children: Vec<ParsedPayload>,
}

fn parse_payload(payload: &Value) -> RemoteResult<ParsedPayload> {
    let block_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::validation("body.children[].type should be defined"))?;
    let mut content = match payload.get(block_type) {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(RemoteError::validation(format!(
                "body.children[].{block_type} should be an object"
            )));
        }
        None => Map::new(),
    };
    let children = match content.remove("children") {
        Some(Value::Array(items)) => items.iter().map(parse_payload).collect::<RemoteResult<_>>()?,
        Some(_) => {
            return Err(RemoteError::validation("children should be an array"));
        }
        None => Vec::new(),
    };
    Ok(ParsedPayload {
        block_type: block_type.to_string(),
        content: Value::Object(content),
        children,
    })
}

fn properties_map(properties: &Value) -> RemoteResult<Map<String, Value>> {
    match properties {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(RemoteError::validation("properties should be an object")),
    }
}

/// In-memory [`DocumentService`].
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: Mutex<State>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one remote call: count it, then apply any pending fault.
    fn call<T>(
        &self,
        op: RemoteOp,
        target: &str,
        f: impl FnOnce(&mut State) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        match state.take_fault(op, target) {
            Some(fault) if fault.apply_first => {
                f(&mut *state)?;
                Err(fault.error)
            }
            Some(fault) => Err(fault.error),
            None => f(&mut *state),
        }
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Create a page directly (not counted as a call).
    pub fn add_page(&self, parent_id: &str, title: &str) -> String {
        let mut state = self.state.lock();
        let id = Uuid::new_v4().to_string();
        let page = RemotePage {
            id: id.clone(),
            parent_id: parent_id.to_string(),
            title: title.to_string(),
            properties: Default::default(),
            last_edited_time: state.stamp(),
            archived: false,
        };
        state.pages.insert(id.clone(), page);
        id
    }

    /// Append a block payload under `parent_id` directly. Nested `children`
    /// inside the payload are created too. Malformed payloads are ignored and
    /// yield an empty id.
    pub fn add_block(&self, parent_id: &str, payload: Value) -> String {
        let Ok(parsed) = parse_payload(&payload) else {
            return String::new();
        };
        let mut state = self.state.lock();
        let id = state.create_block(parent_id, &parsed);
        state
            .children
            .entry(parent_id.to_string())
            .or_default()
            .push(id.clone());
        id
    }

    /// Append a single-run text block.
    pub fn add_text(&self, parent_id: &str, block_type: &str, text: &str) -> String {
        self.add_block(parent_id, RemoteBlock::text_payload(block_type, text))
    }

    /// Define (or replace) a container's property schema.
    pub fn define_schema(&self, container_id: &str, properties: &[(&str, &str)]) {
        let schema = PropertySchema {
            container_id: container_id.to_string(),
            properties: properties
                .iter()
                .map(|(name, kind)| (name.to_string(), kind.to_string()))
                .collect(),
        };
        self.state
            .lock()
            .schemas
            .insert(container_id.to_string(), schema);
    }

    pub fn add_property(&self, container_id: &str, name: &str, kind: &str) {
        let mut state = self.state.lock();
        let schema = state
            .schemas
            .entry(container_id.to_string())
            .or_insert_with(|| PropertySchema {
                container_id: container_id.to_string(),
                properties: Default::default(),
            });
        schema.properties.insert(name.to_string(), kind.to_string());
    }

    pub fn remove_property(&self, container_id: &str, name: &str) {
        if let Some(schema) = self.state.lock().schemas.get_mut(container_id) {
            schema.properties.remove(name);
        }
    }

    /// Simulate a concurrent edit: bump a block's last-edited time.
    pub fn touch(&self, block_id: &str) {
        let mut state = self.state.lock();
        let stamp = state.stamp();
        if let Some(block) = state.blocks.get_mut(block_id) {
            block.last_edited_time = stamp;
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Live children of `parent_id`, in order.
    pub fn children_of(&self, parent_id: &str) -> Vec<RemoteBlock> {
        let state = self.state.lock();
        state
            .children
            .get(parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.blocks.get(id))
                    .filter(|b| !b.archived)
                    .map(|b| state.snapshot(b))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Plain texts of the live children of `parent_id`.
    pub fn texts_of(&self, parent_id: &str) -> Vec<String> {
        self.children_of(parent_id)
            .iter()
            .map(|b| plain_text_of(&b.content))
            .collect()
    }

    /// A block by id, archived or not.
    pub fn block(&self, block_id: &str) -> Option<RemoteBlock> {
        let state = self.state.lock();
        state.blocks.get(block_id).map(|b| state.snapshot(b))
    }

    pub fn page(&self, page_id: &str) -> Option<RemotePage> {
        self.state.lock().pages.get(page_id).cloned()
    }

    /// Pages directly under `parent_id`.
    pub fn pages_under(&self, parent_id: &str) -> Vec<RemotePage> {
        let state = self.state.lock();
        let mut pages: Vec<RemotePage> = state
            .pages
            .values()
            .filter(|p| p.parent_id == parent_id && !p.archived)
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.last_edited_time.cmp(&b.last_edited_time));
        pages
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Fail the next call of `op` without applying it.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.push_fault(op, None, error, false);
    }

    /// Apply the next call of `op`, then report `error` anyway.
    pub fn fail_after_apply(&self, op: RemoteOp, error: RemoteError) {
        self.push_fault(op, None, error, true);
    }

    /// Fail the next call of `op` that targets `target` (block, page, parent
    /// or container id, or the search query).
    pub fn fail_for(&self, op: RemoteOp, target: &str, error: RemoteError) {
        self.push_fault(op, Some(target.to_string()), error, false);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    fn push_fault(&self, op: RemoteOp, target: Option<String>, error: RemoteError, apply_first: bool) {
        self.state.lock().faults.push(Fault {
            op,
            target,
            error,
            apply_first,
        });
    }

    /// How many times `op` has been called.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DocumentService for MemoryWorkspace {
    async fn retrieve_block(&self, block_id: &str) -> RemoteResult<RemoteBlock> {
        self.call(RemoteOp::RetrieveBlock, block_id, |state| state.live_block(block_id))
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> RemoteResult<ChildPage> {
        self.call(RemoteOp::ListChildren, block_id, |state| {
            if !state.is_container(block_id) {
                return Err(RemoteError::not_found(block_id));
            }
            let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
            let start = match cursor {
                Some(c) => c
                    .parse::<usize>()
                    .map_err(|_| RemoteError::validation(format!("invalid start_cursor: {c}")))?,
                None => 0,
            };
            let ids = state.children.get(block_id).cloned().unwrap_or_default();
            let end = (start + page_size).min(ids.len());
            let results = ids
                .get(start..end)
                .unwrap_or_default()
                .iter()
                .filter_map(|id| state.blocks.get(id))
                .map(|b| state.snapshot(b))
                .collect();
            Ok(ChildPage {
                results,
                next_cursor: (end < ids.len()).then(|| end.to_string()),
            })
        })
    }

    async fn append_children(
        &self,
        parent_id: &str,
        children: &[Value],
        position: &InsertPosition,
    ) -> RemoteResult<Vec<RemoteBlock>> {
        self.call(RemoteOp::AppendChildren, parent_id, |state| {
            if !state.is_container(parent_id) {
                return Err(RemoteError::not_found(parent_id));
            }
            if children.is_empty() || children.len() > MAX_PAGE_SIZE {
                return Err(RemoteError::validation(format!(
                    "body.children length should be between 1 and {MAX_PAGE_SIZE}"
                )));
            }
            let parsed = children.iter().map(parse_payload).collect::<RemoteResult<Vec<_>>>()?;

            let existing = state.children.get(parent_id).cloned().unwrap_or_default();
            let mut index = match position {
                InsertPosition::End => existing.len(),
                InsertPosition::Start => 0,
                InsertPosition::After(after) => existing
                    .iter()
                    .position(|id| id == after)
                    .map(|i| i + 1)
                    .ok_or_else(|| {
                        RemoteError::validation(format!("block {after} is not a child of {parent_id}"))
                    })?,
            };

            let mut created = Vec::with_capacity(parsed.len());
            for payload in &parsed {
                let id = state.create_block(parent_id, payload);
                state
                    .children
                    .entry(parent_id.to_string())
                    .or_default()
                    .insert(index, id.clone());
                index += 1;
                created.push(id);
            }
            created.iter().map(|id| state.live_block(id)).collect()
        })
    }

    async fn update_block(&self, block_id: &str, payload: &Value) -> RemoteResult<RemoteBlock> {
        self.call(RemoteOp::UpdateBlock, block_id, |state| {
            let current = state.live_block(block_id)?;
            let fields = payload
                .as_object()
                .ok_or_else(|| RemoteError::validation("body should be an object"))?;

            let mut content = current.content.as_object().cloned().unwrap_or_default();
            for (key, value) in fields {
                if key == "type" {
                    if value.as_str() != Some(current.block_type.as_str()) {
                        return Err(RemoteError::validation("block type cannot be changed"));
                    }
                } else if *key == current.block_type {
                    let updates = value.as_object().ok_or_else(|| {
                        RemoteError::validation(format!("body.{key} should be an object"))
                    })?;
                    for (field, v) in updates {
                        content.insert(field.clone(), v.clone());
                    }
                } else {
                    return Err(RemoteError::validation(format!(
                        "{key} is not a valid field for a {} block",
                        current.block_type
                    )));
                }
            }

            let stamp = state.stamp();
            if let Some(block) = state.blocks.get_mut(block_id) {
                block.content = Value::Object(content);
                block.last_edited_time = stamp;
            }
            state.live_block(block_id)
        })
    }

    async fn delete_block(&self, block_id: &str) -> RemoteResult<RemoteBlock> {
        self.call(RemoteOp::DeleteBlock, block_id, |state| {
            let current = state.live_block(block_id)?;
            let stamp = state.stamp();
            if let Some(parent) = current.parent_id.as_deref() {
                if let Some(siblings) = state.children.get_mut(parent) {
                    siblings.retain(|id| id != block_id);
                }
            }
            let block = state
                .blocks
                .get_mut(block_id)
                .ok_or_else(|| RemoteError::not_found(block_id))?;
            block.archived = true;
            block.last_edited_time = stamp;
            let archived = block.clone();
            Ok(state.snapshot(&archived))
        })
    }

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        properties: &Value,
        children: &[Value],
    ) -> RemoteResult<RemotePage> {
        self.call(RemoteOp::CreatePage, parent_id, |state| {
            let properties = properties_map(properties)?;
            state.check_properties(parent_id, &properties)?;
            let parsed = children.iter().map(parse_payload).collect::<RemoteResult<Vec<_>>>()?;

            let id = Uuid::new_v4().to_string();
            let page = RemotePage {
                id: id.clone(),
                parent_id: parent_id.to_string(),
                title: title.to_string(),
                properties: properties.into_iter().collect(),
                last_edited_time: state.stamp(),
                archived: false,
            };
            state.pages.insert(id.clone(), page.clone());
            let ids: Vec<String> = parsed.iter().map(|p| state.create_block(&id, p)).collect();
            if !ids.is_empty() {
                state.children.insert(id, ids);
            }
            Ok(page)
        })
    }

    async fn update_page(&self, page_id: &str, properties: &Value) -> RemoteResult<RemotePage> {
        self.call(RemoteOp::UpdatePage, page_id, |state| {
            let parent = match state.pages.get(page_id) {
                Some(page) if !page.archived => page.parent_id.clone(),
                _ => return Err(RemoteError::not_found(page_id)),
            };
            let properties = properties_map(properties)?;
            state.check_properties(&parent, &properties)?;

            let stamp = state.stamp();
            let page = state
                .pages
                .get_mut(page_id)
                .ok_or_else(|| RemoteError::not_found(page_id))?;
            page.properties.extend(properties);
            page.last_edited_time = stamp;
            Ok(page.clone())
        })
    }

    async fn search(&self, query: &str) -> RemoteResult<Vec<RemotePage>> {
        self.call(RemoteOp::Search, query, |state| {
            let needle = query.to_lowercase();
            let mut hits: Vec<RemotePage> = state
                .pages
                .values()
                .filter(|p| !p.archived && p.title.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            hits.sort_by(|a, b| a.last_edited_time.cmp(&b.last_edited_time));
            Ok(hits)
        })
    }

    async fn retrieve_schema(&self, container_id: &str) -> RemoteResult<PropertySchema> {
        self.call(RemoteOp::RetrieveSchema, container_id, |state| {
            state
                .schemas
                .get(container_id)
                .cloned()
                .ok_or_else(|| RemoteError::not_found(container_id))
        })
    }
}
