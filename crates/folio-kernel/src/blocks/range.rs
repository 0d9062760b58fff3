//! Range replacement planning and execution.
//!
//! A plan names a contiguous slice of siblings to delete and the anchor to
//! insert the replacement at. It also carries a fingerprint of the slice
//! (`id:last_edited_time` pairs, in order). Execution re-lists the parent,
//! recomputes the fingerprint and refuses to write if anything moved.
//!
//! Replacement content is inserted first, then the originals are deleted.
//! A failed insert leaves the document untouched; a failed delete leaves a
//! partially deleted range reported as [`FolioError::PartialDelete`].

use folio_types::{FlatBlock, Selector, hash_hex};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::flatten::{FlatTree, list_all_children};
use super::selector::resolve_single;
use crate::error::{FolioError, FolioResult};
use crate::remote::{DocumentService, InsertPosition};

fn inclusive() -> bool {
    true
}

/// Range endpoints as the caller specifies them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSpec {
    pub start: Selector,
    pub end: Selector,
    #[serde(default = "inclusive")]
    pub start_inclusive: bool,
    #[serde(default = "inclusive")]
    pub end_inclusive: bool,
}

impl RangeSpec {
    /// Inclusive on both ends.
    pub fn new(start: Selector, end: Selector) -> Self {
        Self {
            start,
            end,
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    pub fn exclusive_start(mut self) -> Self {
        self.start_inclusive = false;
        self
    }

    pub fn exclusive_end(mut self) -> Self {
        self.end_inclusive = false;
        self
    }
}

/// Where replacement content goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Anchor {
    /// The slice starts at the first child.
    StartOfParent,
    /// After the sibling preceding the slice.
    After(String),
}

impl Anchor {
    pub fn position(&self) -> InsertPosition {
        match self {
            Anchor::StartOfParent => InsertPosition::Start,
            Anchor::After(id) => InsertPosition::After(id.clone()),
        }
    }
}

/// A validated range replacement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RangePlan {
    pub parent_id: String,
    /// Sibling index of the first deleted block.
    pub start_index: usize,
    /// Sibling index of the last deleted block.
    pub end_index: usize,
    pub delete_ids: Vec<String>,
    pub anchor: Anchor,
    pub fingerprint: String,
}

/// What a completed replacement did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeOutcome {
    pub inserted: Vec<String>,
    pub deleted: Vec<String>,
}

/// Digest of an ordered sibling slice.
pub fn fingerprint<'a>(blocks: impl IntoIterator<Item = &'a FlatBlock>) -> String {
    let parts: Vec<String> = blocks.into_iter().map(FlatBlock::fingerprint_part).collect();
    hash_hex(parts.join("\n"))
}

/// Resolve both endpoints and compute the deletion slice and anchor.
pub fn plan_range(tree: &FlatTree, spec: &RangeSpec) -> FolioResult<RangePlan> {
    let start = resolve_single(&tree.blocks, &spec.start)?;
    let end = resolve_single(&tree.blocks, &spec.end)?;

    if start.parent_id != end.parent_id {
        return Err(FolioError::InvalidInput(format!(
            "range endpoints must share a parent: start is under {}, end is under {}",
            start.parent_id, end.parent_id
        )));
    }

    let start_index = start.sibling_index + usize::from(!spec.start_inclusive);
    let end_index = if spec.end_inclusive {
        Some(end.sibling_index)
    } else {
        end.sibling_index.checked_sub(1)
    };
    let end_index = match end_index {
        Some(end_index) if start_index <= end_index => end_index,
        _ => {
            return Err(FolioError::InvalidInput(format!(
                "range is empty or reversed: start sibling {} is after end sibling {}",
                start.sibling_index, end.sibling_index
            )));
        }
    };

    let siblings = tree.siblings(&start.parent_id);
    let slice = siblings.get(start_index..=end_index).ok_or_else(|| {
        FolioError::Internal(format!(
            "sibling slice {start_index}..={end_index} outside parent {}",
            start.parent_id
        ))
    })?;

    let anchor = match start_index {
        0 => Anchor::StartOfParent,
        i => Anchor::After(siblings[i - 1].id.clone()),
    };

    Ok(RangePlan {
        parent_id: start.parent_id.clone(),
        start_index,
        end_index,
        delete_ids: slice.iter().map(|b| b.id.clone()).collect(),
        anchor,
        fingerprint: fingerprint(slice.iter().copied()),
    })
}

/// Re-list the parent and check the planned slice and anchor are unchanged.
pub async fn revalidate(
    service: &dyn DocumentService,
    plan: &RangePlan,
    page_size: usize,
) -> FolioResult<()> {
    let current = list_all_children(service, &plan.parent_id, page_size, usize::MAX)
        .await?
        .unwrap_or_default();
    let current: Vec<FlatBlock> = current
        .iter()
        .enumerate()
        .map(|(i, b)| FlatBlock::from_remote(b, &plan.parent_id, i, i, 0))
        .collect();

    let changed = || {
        FolioError::Conflict(format!(
            "siblings under {} changed since the range was planned; re-read and retry",
            plan.parent_id
        ))
    };

    let slice = current
        .get(plan.start_index..=plan.end_index)
        .ok_or_else(changed)?;
    if fingerprint(slice) != plan.fingerprint {
        return Err(changed());
    }
    let anchor_holds = match &plan.anchor {
        Anchor::StartOfParent => plan.start_index == 0,
        Anchor::After(id) => plan
            .start_index
            .checked_sub(1)
            .and_then(|i| current.get(i))
            .is_some_and(|b| &b.id == id),
    };
    if !anchor_holds {
        return Err(changed());
    }
    Ok(())
}

/// Revalidate, insert `children` at the anchor, then delete the planned slice.
pub async fn execute_plan(
    service: &dyn DocumentService,
    plan: &RangePlan,
    children: &[Value],
    page_size: usize,
    max_in_flight: usize,
) -> FolioResult<RangeOutcome> {
    revalidate(service, plan, page_size).await?;

    let inserted: Vec<String> = if children.is_empty() {
        Vec::new()
    } else {
        service
            .append_children(&plan.parent_id, children, &plan.anchor.position())
            .await?
            .into_iter()
            .map(|b| b.id)
            .collect()
    };
    debug!(parent_id = %plan.parent_id, inserted = inserted.len(), "replacement inserted");

    let results: Vec<(String, FolioResult<()>)> = stream::iter(plan.delete_ids.iter().cloned())
        .map(|id| async move {
            let result = service.delete_block(&id).await.map(|_| ()).map_err(FolioError::from);
            (id, result)
        })
        .buffered(max_in_flight.max(1))
        .collect()
        .await;

    let mut deleted = Vec::new();
    let mut remaining = Vec::new();
    let mut first_error = None;
    for (id, result) in results {
        match result {
            Ok(()) => deleted.push(id),
            Err(e) => {
                warn!(block_id = %id, error = %e, "range deletion failed");
                remaining.push(id);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        None => Ok(RangeOutcome { inserted, deleted }),
        Some(source) => Err(FolioError::PartialDelete {
            inserted,
            deleted,
            remaining,
            source: Box::new(source),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{ScanLimits, flatten};
    use crate::error::RemoteError;
    use crate::remote::{MemoryWorkspace, RemoteOp};
    use folio_types::{ErrorKind, RemoteBlock};

    async fn doc(texts: &[&str]) -> (MemoryWorkspace, String) {
        let ws = MemoryWorkspace::new();
        let page = ws.add_page("root", "Doc");
        for text in texts {
            ws.add_text(&page, "paragraph", text);
        }
        (ws, page)
    }

    fn between(a: &str, b: &str) -> RangeSpec {
        RangeSpec::new(Selector::new().containing(a), Selector::new().containing(b))
    }

    fn replacement(text: &str) -> Vec<Value> {
        vec![RemoteBlock::text_payload("paragraph", text)]
    }

    #[tokio::test]
    async fn test_inclusive_plan() {
        let (ws, page) = doc(&["intro", "alpha", "beta", "gamma", "outro"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "gamma")).unwrap();

        assert_eq!(plan.parent_id, page);
        assert_eq!((plan.start_index, plan.end_index), (1, 3));
        assert_eq!(plan.delete_ids.len(), 3);
        assert_eq!(plan.anchor, Anchor::After(tree.blocks[0].id.clone()));
    }

    #[tokio::test]
    async fn test_exclusive_endpoints() {
        let (ws, page) = doc(&["start", "x", "y", "end"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let spec = between("start", "end").exclusive_start().exclusive_end();
        let plan = plan_range(&tree, &spec).unwrap();
        assert_eq!((plan.start_index, plan.end_index), (1, 2));
        assert_eq!(plan.anchor, Anchor::After(tree.blocks[0].id.clone()));
    }

    #[tokio::test]
    async fn test_anchor_at_start_of_parent() {
        let (ws, page) = doc(&["a", "b", "c"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("a", "b")).unwrap();
        assert_eq!(plan.anchor, Anchor::StartOfParent);
        assert_eq!(plan.anchor.position(), InsertPosition::Start);
    }

    #[tokio::test]
    async fn test_reversed_range_is_invalid() {
        let (ws, page) = doc(&["a", "b", "c"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let err = plan_range(&tree, &between("c", "a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // Adjacent endpoints, both exclusive: nothing in between.
        let spec = between("a", "b").exclusive_start().exclusive_end();
        assert_eq!(plan_range(&tree, &spec).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_cross_parent_is_rejected() {
        let ws = MemoryWorkspace::new();
        let page = ws.add_page("root", "Doc");
        let outer = ws.add_text(&page, "paragraph", "outer");
        ws.add_text(&outer, "paragraph", "inner");
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();

        let err = plan_range(&tree, &between("outer", "inner")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("share a parent"));
    }

    #[tokio::test]
    async fn test_execute_replaces_slice() {
        let (ws, page) = doc(&["intro", "alpha", "beta", "outro"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "beta")).unwrap();

        let outcome = execute_plan(&ws, &plan, &replacement("merged"), 100, 4).await.unwrap();
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.deleted, plan.delete_ids);
        assert_eq!(ws.texts_of(&page), vec!["intro", "merged", "outro"]);
    }

    #[tokio::test]
    async fn test_edited_slice_is_conflict_without_writes() {
        let (ws, page) = doc(&["intro", "alpha", "beta", "outro"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "beta")).unwrap();

        // Someone edits "beta" between planning and execution.
        ws.touch(&plan.delete_ids[1]);

        let err = execute_plan(&ws, &plan, &replacement("merged"), 100, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(ws.calls(RemoteOp::AppendChildren), 0);
        assert_eq!(ws.calls(RemoteOp::DeleteBlock), 0);
        assert_eq!(ws.texts_of(&page), vec!["intro", "alpha", "beta", "outro"]);
    }

    #[tokio::test]
    async fn test_inserted_sibling_before_slice_is_conflict() {
        let (ws, page) = doc(&["intro", "alpha", "beta"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "beta")).unwrap();

        ws.append_children(&page, &replacement("sneaky"), &InsertPosition::Start)
            .await
            .unwrap();

        let err = execute_plan(&ws, &plan, &replacement("merged"), 100, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(ws.calls(RemoteOp::DeleteBlock), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_original() {
        let (ws, page) = doc(&["alpha", "beta"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "beta")).unwrap();
        ws.fail_next(RemoteOp::AppendChildren, RemoteError::validation("bad block"));

        let err = execute_plan(&ws, &plan, &replacement("x"), 100, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(ws.calls(RemoteOp::DeleteBlock), 0);
        assert_eq!(ws.texts_of(&page), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_partial_delete_reports_ids() {
        let (ws, page) = doc(&["alpha", "beta", "gamma"]).await;
        let tree = flatten(&ws, &page, &ScanLimits::default()).await.unwrap();
        let plan = plan_range(&tree, &between("alpha", "gamma")).unwrap();
        let stuck = plan.delete_ids[1].clone();
        ws.fail_for(RemoteOp::DeleteBlock, &stuck, RemoteError::server(500));

        let err = execute_plan(&ws, &plan, &replacement("new"), 100, 2).await.unwrap_err();
        match err {
            FolioError::PartialDelete {
                inserted,
                deleted,
                remaining,
                ..
            } => {
                assert_eq!(inserted.len(), 1);
                assert_eq!(deleted, vec![plan.delete_ids[0].clone(), plan.delete_ids[2].clone()]);
                assert_eq!(remaining, vec![stuck]);
            }
            other => panic!("expected PartialDelete, got {other:?}"),
        }
        assert_eq!(ws.texts_of(&page), vec!["new", "beta"]);
    }

    #[test]
    fn test_fingerprint_tracks_edit_time() {
        let mut a = FlatBlock {
            id: "b1".into(),
            parent_id: "p".into(),
            block_type: "paragraph".into(),
            text: "x".into(),
            has_children: false,
            last_edited_time: "t1".into(),
            sibling_index: 0,
            order_index: 0,
            depth: 0,
        };
        let before = fingerprint([&a]);
        a.last_edited_time = "t2".into();
        assert_ne!(before, fingerprint([&a]));
    }

    #[test]
    fn test_spec_wire_defaults() {
        let spec: RangeSpec = serde_json::from_str(
            r#"{"start":{"where":{"textContains":"a"}},"end":{"where":{"textContains":"b"}},"endInclusive":false}"#,
        )
        .unwrap();
        assert!(spec.start_inclusive);
        assert!(!spec.end_inclusive);
    }
}
