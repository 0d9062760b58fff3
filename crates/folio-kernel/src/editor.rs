//! Mutating document commands.
//!
//! Every write goes through the [`MutationCoordinator`] with a canonical
//! request shape, so retries replay instead of writing twice. Commands that
//! can tell whether an ambiguous failure actually landed supply a recovery
//! probe:
//!
//! | Command                 | Recovery probe                                   |
//! |-------------------------|--------------------------------------------------|
//! | `block.append`          | matching run of new children at the anchor       |
//! | `block.update`          | block content equals the payload                 |
//! | `block.delete`          | block is gone                                    |
//! | `page.create`           | exactly one new page with the title              |
//! | `page.update`           | none                                             |
//! | `block.insert`          | as `block.append`, at the resolved anchor        |
//! | `block.delete_matching` | as `block.delete`, for the resolved block        |
//! | `range.replace`         | none                                             |
//!
//! Probes only count blocks and pages that were absent from a snapshot taken
//! just before the write. Content that already looked like the payload never
//! confirms a write.

use std::collections::HashSet;
use std::sync::Arc;

use folio_types::{RemoteBlock, Selector, payload_signature, plain_text_of};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::blocks::{
    RangePlan, RangeSpec, ScanLimits, SelectorResolution, execute_plan, flatten,
    list_all_children, plan_range, resolve_selector, resolve_single,
};
use crate::config::FolioConfig;
use crate::coordinator::{Mutation, MutationCoordinator, MutationOutcome};
use crate::error::{FolioError, FolioResult, RemoteError};
use crate::remote::{DocumentService, InsertPosition};
use crate::schema_cache::SchemaCache;

/// Which side of the selected block `block.insert` puts new content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Before,
    #[default]
    After,
}

/// Where an append went, and which children the parent already had.
#[derive(Clone, Debug)]
struct AppendAnchor {
    parent_id: String,
    position: InsertPosition,
    existing: HashSet<String>,
}

/// Selector-driven, idempotent editing of a remote workspace.
pub struct DocumentEditor {
    service: Arc<dyn DocumentService>,
    coordinator: MutationCoordinator,
    schemas: SchemaCache,
    limits: ScanLimits,
    max_in_flight: usize,
}

impl DocumentEditor {
    pub fn new(service: Arc<dyn DocumentService>, coordinator: MutationCoordinator) -> Self {
        let defaults = FolioConfig::default();
        Self {
            service,
            coordinator,
            schemas: SchemaCache::new(defaults.schema_ttl()),
            limits: defaults.scan_limits(),
            max_in_flight: defaults.concurrency.max_in_flight,
        }
    }

    /// Production wiring: file-backed store, JSONL audit, configured limits.
    pub fn from_config(service: Arc<dyn DocumentService>, config: &FolioConfig) -> FolioResult<Self> {
        config.validate()?;
        let coordinator = MutationCoordinator::from_config(config)?;
        Ok(Self {
            service,
            coordinator,
            schemas: SchemaCache::new(config.schema_ttl()),
            limits: config.scan_limits(),
            max_in_flight: config.concurrency.max_in_flight,
        })
    }

    pub fn with_limits(mut self, limits: ScanLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_schema_cache(mut self, schemas: SchemaCache) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    fn service(&self) -> &dyn DocumentService {
        self.service.as_ref()
    }

    // ========================================================================
    // Read-only
    // ========================================================================

    /// Resolve `selector` under `scope_id`, tolerating ambiguity.
    pub async fn select(&self, scope_id: &str, selector: &Selector) -> FolioResult<SelectorResolution> {
        let tree = flatten(self.service(), scope_id, &self.limits).await?;
        resolve_selector(&tree.blocks, selector)
    }

    /// Plan a range replacement without writing anything.
    pub async fn plan_replace(&self, scope_id: &str, range: &RangeSpec) -> FolioResult<RangePlan> {
        let tree = flatten(self.service(), scope_id, &self.limits).await?;
        plan_range(&tree, range)
    }

    // ========================================================================
    // Block writes
    // ========================================================================

    /// `block.append`: add children to a page or block.
    pub async fn append(
        &self,
        parent_id: &str,
        children: Vec<Value>,
        position: InsertPosition,
    ) -> FolioResult<MutationOutcome> {
        validate_children(&children)?;
        let request = json!({ "parent": parent_id, "children": children, "position": position });
        let anchor = Mutex::new(None);
        let mutation = Mutation::new(
            "block.append",
            request,
            self.run_append(parent_id, &children, &position, &anchor),
        )
        .target(parent_id)
        .recover(self.confirm_append(&children, &anchor));
        self.coordinator.execute(mutation).await
    }

    /// `block.update`: set fields on a block's type-specific content.
    pub async fn update_block(&self, block_id: &str, payload: Value) -> FolioResult<MutationOutcome> {
        if !payload.is_object() {
            return Err(FolioError::InvalidInput("update payload must be an object".into()));
        }
        let request = json!({ "block_id": block_id, "payload": payload });
        let mutation = Mutation::new("block.update", request, self.run_update(block_id, &payload))
            .target(block_id)
            .recover(self.confirm_update(block_id, &payload));
        self.coordinator.execute(mutation).await
    }

    /// `block.delete`: archive one block by id.
    pub async fn delete_block(&self, block_id: &str) -> FolioResult<MutationOutcome> {
        let request = json!({ "block_id": block_id });
        let mutation = Mutation::new("block.delete", request, self.run_delete(block_id))
            .target(block_id)
            .recover(self.confirm_deleted(block_id));
        self.coordinator.execute(mutation).await
    }

    /// `block.insert`: add children before or after the block `selector`
    /// resolves to under `scope_id`.
    pub async fn insert(
        &self,
        scope_id: &str,
        selector: &Selector,
        placement: Placement,
        children: Vec<Value>,
    ) -> FolioResult<MutationOutcome> {
        validate_children(&children)?;
        let request = json!({
            "scope": scope_id,
            "selector": selector,
            "placement": placement,
            "children": children,
        });
        let anchor = Mutex::new(None);
        let mutation = Mutation::new(
            "block.insert",
            request,
            self.run_insert(scope_id, selector, placement, &children, &anchor),
        )
        .target(scope_id)
        .recover(self.confirm_append(&children, &anchor));
        self.coordinator.execute(mutation).await
    }

    /// `block.delete_matching`: delete the single block `selector` resolves to.
    pub async fn delete_matching(&self, scope_id: &str, selector: &Selector) -> FolioResult<MutationOutcome> {
        let request = json!({ "scope": scope_id, "selector": selector });
        let resolved = Mutex::new(None);
        let mutation = Mutation::new(
            "block.delete_matching",
            request,
            self.run_delete_matching(scope_id, selector, &resolved),
        )
        .target(scope_id)
        .recover(self.confirm_delete_matching(&resolved));
        self.coordinator.execute(mutation).await
    }

    /// `range.replace`: swap a sibling range for new content. Empty
    /// `children` deletes the range.
    pub async fn replace_range(
        &self,
        scope_id: &str,
        range: &RangeSpec,
        children: Vec<Value>,
    ) -> FolioResult<MutationOutcome> {
        if !children.is_empty() {
            validate_children(&children)?;
        }
        let request = json!({ "scope": scope_id, "range": range, "children": children });
        let mutation = Mutation::new(
            "range.replace",
            request,
            self.run_replace(scope_id, range, &children),
        )
        .target(scope_id);
        self.coordinator.execute(mutation).await
    }

    // ========================================================================
    // Page writes
    // ========================================================================

    /// `page.create`.
    pub async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        properties: Value,
        children: Vec<Value>,
    ) -> FolioResult<MutationOutcome> {
        if title.trim().is_empty() {
            return Err(FolioError::InvalidInput("page title must not be empty".into()));
        }
        let request = json!({
            "parent": parent_id,
            "title": title,
            "properties": properties,
            "children": children,
        });
        let existing = Mutex::new(None);
        let mutation = Mutation::new(
            "page.create",
            request,
            self.run_create_page(parent_id, title, &properties, &children, &existing),
        )
        .target(parent_id)
        .recover(self.confirm_page_created(parent_id, title, &existing));
        self.coordinator.execute(mutation).await
    }

    /// `page.update`: set properties on a page in `container_id`.
    ///
    /// Property names are checked against the container's schema first.
    pub async fn update_page(
        &self,
        page_id: &str,
        container_id: &str,
        properties: Value,
    ) -> FolioResult<MutationOutcome> {
        let names: Vec<String> = match &properties {
            Value::Object(map) if !map.is_empty() => map.keys().cloned().collect(),
            _ => {
                return Err(FolioError::InvalidInput(
                    "properties must be a non-empty object".into(),
                ));
            }
        };
        let request = json!({
            "page_id": page_id,
            "container_id": container_id,
            "properties": properties,
        });
        let mutation = Mutation::new(
            "page.update",
            request,
            self.run_update_page(page_id, container_id, &properties, &names),
        )
        .target(page_id)
        .target(container_id);
        self.coordinator.execute(mutation).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    async fn run_append(
        &self,
        parent_id: &str,
        children: &[Value],
        position: &InsertPosition,
        anchor: &Mutex<Option<AppendAnchor>>,
    ) -> FolioResult<Value> {
        let listed = list_all_children(
            self.service(),
            parent_id,
            self.limits.page_size,
            self.limits.max_blocks,
        )
        .await?;
        match listed {
            Some(blocks) => {
                *anchor.lock() = Some(AppendAnchor {
                    parent_id: parent_id.to_string(),
                    position: position.clone(),
                    existing: blocks.into_iter().map(|b| b.id).collect(),
                });
            }
            None => debug!(parent_id, "parent too large to snapshot, append is unrecoverable"),
        }
        self.write_children(parent_id, children, position).await
    }

    async fn write_children(
        &self,
        parent_id: &str,
        children: &[Value],
        position: &InsertPosition,
    ) -> FolioResult<Value> {
        let created = self
            .service()
            .append_children(parent_id, children, position)
            .await?;
        Ok(appended(&created))
    }

    async fn run_update(&self, block_id: &str, payload: &Value) -> FolioResult<Value> {
        let block = self.service().update_block(block_id, payload).await?;
        to_json(&block)
    }

    async fn run_delete(&self, block_id: &str) -> FolioResult<Value> {
        self.service().delete_block(block_id).await?;
        Ok(json!({ "deleted": block_id }))
    }

    async fn run_insert(
        &self,
        scope_id: &str,
        selector: &Selector,
        placement: Placement,
        children: &[Value],
        anchor: &Mutex<Option<AppendAnchor>>,
    ) -> FolioResult<Value> {
        let tree = flatten(self.service(), scope_id, &self.limits).await?;
        let target = resolve_single(&tree.blocks, selector)?;
        let position = match placement {
            Placement::After => InsertPosition::After(target.id.clone()),
            Placement::Before => target
                .sibling_index
                .checked_sub(1)
                .and_then(|i| tree.sibling_ids(&target.parent_id).get(i))
                .map_or(InsertPosition::Start, |prev| InsertPosition::After(prev.clone())),
        };
        *anchor.lock() = Some(AppendAnchor {
            parent_id: target.parent_id.clone(),
            position: position.clone(),
            existing: tree.sibling_ids(&target.parent_id).iter().cloned().collect(),
        });
        self.write_children(&target.parent_id, children, &position).await
    }

    async fn run_delete_matching(
        &self,
        scope_id: &str,
        selector: &Selector,
        resolved: &Mutex<Option<String>>,
    ) -> FolioResult<Value> {
        let tree = flatten(self.service(), scope_id, &self.limits).await?;
        let target = resolve_single(&tree.blocks, selector)?;
        *resolved.lock() = Some(target.id.clone());
        self.run_delete(&target.id).await
    }

    async fn run_replace(&self, scope_id: &str, range: &RangeSpec, children: &[Value]) -> FolioResult<Value> {
        let tree = flatten(self.service(), scope_id, &self.limits).await?;
        let plan = plan_range(&tree, range)?;
        let outcome = execute_plan(
            self.service(),
            &plan,
            children,
            self.limits.page_size,
            self.max_in_flight,
        )
        .await?;
        to_json(&outcome)
    }

    async fn run_create_page(
        &self,
        parent_id: &str,
        title: &str,
        properties: &Value,
        children: &[Value],
        existing: &Mutex<Option<HashSet<String>>>,
    ) -> FolioResult<Value> {
        let before = self.titled_pages(parent_id, title).await?;
        *existing.lock() = Some(before);
        let page = self
            .service()
            .create_page(parent_id, title, properties, children)
            .await?;
        to_json(&page)
    }

    async fn run_update_page(
        &self,
        page_id: &str,
        container_id: &str,
        properties: &Value,
        names: &[String],
    ) -> FolioResult<Value> {
        let unknown = self
            .schemas
            .unknown_properties(self.service(), container_id, names)
            .await?;
        if !unknown.is_empty() {
            return Err(unknown_properties(container_id, &unknown));
        }

        match self.service().update_page(page_id, properties).await {
            Ok(page) => to_json(&page),
            Err(e) if rejects_property(&e, names) => {
                // The cached schema said yes, the service said no: refresh and
                // retry once if the fresh schema accepts every name.
                let schema = self.schemas.refresh(self.service(), container_id).await?;
                let unknown = schema.unknown(names.iter().map(String::as_str));
                if !unknown.is_empty() {
                    return Err(unknown_properties(container_id, &unknown));
                }
                let page = self.service().update_page(page_id, properties).await?;
                to_json(&page)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Recovery probes
    // ========================================================================

    /// The requested children sit contiguously at the anchor, and none of
    /// them was there before the write.
    async fn confirm_append(
        &self,
        children: &[Value],
        anchor: &Mutex<Option<AppendAnchor>>,
    ) -> FolioResult<Option<Value>> {
        let slot = anchor.lock().clone();
        let Some(AppendAnchor {
            parent_id,
            position,
            existing,
        }) = slot
        else {
            return Ok(None);
        };
        let wanted: Vec<(String, String)> = children.iter().filter_map(payload_signature).collect();
        let current = list_all_children(
            self.service(),
            &parent_id,
            self.limits.page_size,
            self.limits.max_blocks,
        )
        .await?
        .ok_or_else(|| FolioError::ScanLimit {
            scope_id: parent_id.to_string(),
            max_blocks: self.limits.max_blocks,
        })?;

        let start = match &position {
            InsertPosition::End => current.len().checked_sub(wanted.len()),
            InsertPosition::Start => Some(0),
            InsertPosition::After(id) => current.iter().position(|b| &b.id == id).map(|i| i + 1),
        };
        let Some(run) = start.and_then(|s| current.get(s..s + wanted.len())) else {
            return Ok(None);
        };
        let landed = run.iter().zip(&wanted).all(|(block, (block_type, text))| {
            !existing.contains(&block.id)
                && &block.block_type == block_type
                && &block.plain_text() == text
        });
        Ok(landed.then(|| appended(run)))
    }

    async fn confirm_update(&self, block_id: &str, payload: &Value) -> FolioResult<Option<Value>> {
        let block = self.service().retrieve_block(block_id).await?;
        if payload_applied(&block, payload) {
            Ok(Some(to_json(&block)?))
        } else {
            Ok(None)
        }
    }

    async fn confirm_deleted(&self, block_id: &str) -> FolioResult<Option<Value>> {
        match self.service().retrieve_block(block_id).await {
            Ok(_) => Ok(None),
            Err(e) if e.kind() == folio_types::ErrorKind::NotFound => {
                Ok(Some(json!({ "deleted": block_id })))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn confirm_delete_matching(&self, resolved: &Mutex<Option<String>>) -> FolioResult<Option<Value>> {
        let slot = resolved.lock().clone();
        match slot {
            Some(block_id) => self.confirm_deleted(&block_id).await,
            None => Ok(None),
        }
    }

    /// Ids of the pages titled `title` directly under `parent_id`.
    async fn titled_pages(&self, parent_id: &str, title: &str) -> FolioResult<HashSet<String>> {
        let hits = self.service().search(title).await?;
        Ok(hits
            .into_iter()
            .filter(|p| p.parent_id == parent_id && p.title == title)
            .map(|p| p.id)
            .collect())
    }

    /// Exactly one page with this title under the parent that was not there
    /// before the create.
    async fn confirm_page_created(
        &self,
        parent_id: &str,
        title: &str,
        existing: &Mutex<Option<HashSet<String>>>,
    ) -> FolioResult<Option<Value>> {
        let slot = existing.lock().clone();
        let Some(before) = slot else {
            return Ok(None);
        };
        let hits = self.service().search(title).await?;
        let mut candidates = hits.iter().filter(|p| {
            p.parent_id == parent_id && p.title == title && !before.contains(&p.id)
        });
        match (candidates.next(), candidates.next()) {
            (Some(page), None) => Ok(Some(to_json(page)?)),
            _ => Ok(None),
        }
    }
}

fn validate_children(children: &[Value]) -> FolioResult<()> {
    if children.is_empty() {
        return Err(FolioError::InvalidInput("children must not be empty".into()));
    }
    if let Some(i) = children.iter().position(|c| payload_signature(c).is_none()) {
        return Err(FolioError::InvalidInput(format!(
            "children[{i}] must be an object with a string \"type\""
        )));
    }
    Ok(())
}

fn appended(blocks: &[RemoteBlock]) -> Value {
    json!({ "results": blocks })
}

fn to_json<T: Serialize>(value: &T) -> FolioResult<Value> {
    serde_json::to_value(value).map_err(|e| FolioError::Internal(format!("outcome encoding: {e}")))
}

/// Every field the payload sets on the block's content already holds.
fn payload_applied(block: &RemoteBlock, payload: &Value) -> bool {
    let Some(fields) = payload.as_object() else {
        return false;
    };
    fields.iter().all(|(key, value)| {
        if key == "type" {
            return value.as_str() == Some(block.block_type.as_str());
        }
        if *key != block.block_type {
            return false;
        }
        let Some(updates) = value.as_object() else {
            return false;
        };
        updates.iter().all(|(field, expected)| {
            if field == "rich_text" {
                plain_text_of(&json!({ "rich_text": expected })) == block.plain_text()
            } else {
                block.content.get(field) == Some(expected)
            }
        })
    })
}

/// A validation rejection naming one of the properties we sent.
fn rejects_property(error: &RemoteError, names: &[String]) -> bool {
    error.code.as_deref() == Some("validation_error")
        && error.message.contains("property")
        && names.iter().any(|n| error.message.contains(n.as_str()))
}

fn unknown_properties(container_id: &str, unknown: &[String]) -> FolioError {
    FolioError::InvalidInput(format!(
        "unknown properties for {container_id}: {}",
        unknown.join(", ")
    ))
}
