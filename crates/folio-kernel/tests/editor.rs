//! Mutating commands against the in-memory workspace, including ambiguous
//! remote failures and degraded persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use folio_kernel::{
    CoordinatorConfig, DocumentEditor, DocumentService, FolioConfig, FolioError, InsertPosition,
    MemoryWorkspace, MutationCoordinator, Placement, RemoteError, RemoteOp,
};
use folio_store::{
    EntryMap, ExclusiveAccess, IdempotencyStore, MemoryBackend, StoreBackend, StoreConfig,
    StoreError, StoreResult,
};
use folio_telemetry::{AuditError, AuditEvent, AuditSink, MemoryAuditSink};
use folio_types::{ErrorKind, RemoteBlock, Selector};
use serde_json::json;

struct Harness {
    ws: Arc<MemoryWorkspace>,
    editor: DocumentEditor,
    audit: Arc<MemoryAuditSink>,
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval: Duration::from_millis(5),
        pending_deadline: Duration::from_millis(200),
        ..CoordinatorConfig::default()
    }
}

fn harness() -> Harness {
    let ws = Arc::new(MemoryWorkspace::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let store = Arc::new(IdempotencyStore::in_memory(StoreConfig::default()));
    let coordinator = MutationCoordinator::new(store, audit.clone(), coordinator_config());
    let service: Arc<dyn DocumentService> = ws.clone();
    Harness {
        ws,
        editor: DocumentEditor::new(service, coordinator),
        audit,
    }
}

fn para(text: &str) -> serde_json::Value {
    RemoteBlock::text_payload("paragraph", text)
}

/// Heading, two TODO-ish blocks of different types, and filler.
fn seed_tasks(ws: &MemoryWorkspace) -> String {
    let page = ws.add_page("workspace", "Sprint");
    ws.add_text(&page, "heading_1", "Tasks");
    ws.add_text(&page, "paragraph", "TODO: write docs");
    ws.add_text(&page, "paragraph", "notes from standup");
    ws.add_text(&page, "bulleted_list_item", "todo: ship it");
    ws.add_text(&page, "paragraph", "done");
    page
}

// ============================================================================
// block.append
// ============================================================================

#[tokio::test]
async fn duplicate_append_writes_once() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");

    let first = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap();
    let second = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.value, second.value);
    assert_eq!(first.idempotency_key, second.idempotency_key);
    assert_eq!(h.ws.calls(RemoteOp::AppendChildren), 1);
    assert_eq!(h.ws.texts_of(&page), vec!["hello"]);

    let events = h.audit.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].command, "block.append");
    assert_eq!(events[0].targets, vec![page.clone()]);
    assert!(events[1].replayed);
}

#[tokio::test]
async fn ambiguous_append_that_landed_is_recovered() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    h.ws.add_text(&page, "paragraph", "intro");
    h.ws.fail_after_apply(RemoteOp::AppendChildren, RemoteError::timeout());

    let outcome = h
        .editor
        .append(&page, vec![para("a"), para("b")], InsertPosition::End)
        .await
        .unwrap();
    assert!(outcome.recovered);
    assert_eq!(outcome.value["results"].as_array().unwrap().len(), 2);

    let retry = h
        .editor
        .append(&page, vec![para("a"), para("b")], InsertPosition::End)
        .await
        .unwrap();
    assert!(retry.replayed);
    assert_eq!(h.ws.calls(RemoteOp::AppendChildren), 1);
    assert_eq!(h.ws.texts_of(&page), vec!["intro", "a", "b"]);
}

#[tokio::test]
async fn ambiguous_append_that_did_not_land_is_unconfirmed_then_retried() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    h.ws.add_text(&page, "paragraph", "intro");
    h.ws.fail_next(RemoteOp::AppendChildren, RemoteError::server(503));

    let err = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Unconfirmed { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::RetryableUpstream);

    let retry = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap();
    assert!(!retry.replayed);
    assert_eq!(h.ws.texts_of(&page), vec!["intro", "hello"]);
}

#[tokio::test]
async fn identical_content_already_at_the_anchor_does_not_confirm_a_lost_append() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    h.ws.add_text(&page, "paragraph", "hello");
    h.ws.fail_next(RemoteOp::AppendChildren, RemoteError::timeout());

    let err = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Unconfirmed { .. }), "{err}");
    assert_eq!(h.ws.texts_of(&page), vec!["hello"]);

    let retry = h
        .editor
        .append(&page, vec![para("hello")], InsertPosition::End)
        .await
        .unwrap();
    assert!(!retry.replayed);
    assert!(!retry.recovered);
    assert_eq!(h.ws.texts_of(&page), vec!["hello", "hello"]);
}

#[tokio::test]
async fn identical_content_after_the_anchor_does_not_confirm_a_lost_append() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    let first = h.ws.add_text(&page, "paragraph", "first");
    h.ws.add_text(&page, "paragraph", "middle");
    h.ws.fail_next(RemoteOp::AppendChildren, RemoteError::server(502));

    let err = h
        .editor
        .append(&page, vec![para("middle")], InsertPosition::After(first))
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Unconfirmed { .. }), "{err}");
    assert_eq!(h.ws.texts_of(&page), vec!["first", "middle"]);
}

#[tokio::test]
async fn append_after_anchor_is_recovered_at_that_anchor() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    let first = h.ws.add_text(&page, "paragraph", "first");
    h.ws.add_text(&page, "paragraph", "last");
    h.ws.fail_after_apply(RemoteOp::AppendChildren, RemoteError::rate_limited());

    let outcome = h
        .editor
        .append(&page, vec![para("middle")], InsertPosition::After(first))
        .await
        .unwrap();
    assert!(outcome.recovered);
    assert_eq!(h.ws.texts_of(&page), vec!["first", "middle", "last"]);
}

#[tokio::test]
async fn append_rejects_malformed_children() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");

    let err = h
        .editor
        .append(&page, vec![], InsertPosition::End)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = h
        .editor
        .append(&page, vec![json!({ "paragraph": {} })], InsertPosition::End)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(h.ws.calls(RemoteOp::AppendChildren), 0);
    assert!(h.audit.events().is_empty(), "rejected before coordination");
}

// ============================================================================
// block.update / block.delete
// ============================================================================

#[tokio::test]
async fn ambiguous_update_is_recovered_by_reading_back() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    let block = h.ws.add_text(&page, "paragraph", "draft");
    h.ws.fail_after_apply(RemoteOp::UpdateBlock, RemoteError::timeout());

    let payload = json!({
        "paragraph": { "rich_text": [{ "type": "text", "text": { "content": "final" } }] }
    });
    let outcome = h.editor.update_block(&block, payload).await.unwrap();
    assert!(outcome.recovered);
    assert_eq!(outcome.value["id"], json!(block));
    assert_eq!(h.ws.texts_of(&page), vec!["final"]);
}

#[tokio::test]
async fn update_of_wrong_type_is_invalid_input() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    let block = h.ws.add_text(&page, "paragraph", "draft");

    let err = h
        .editor
        .update_block(&block, json!({ "heading_2": { "color": "red" } }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(h.editor.coordinator().store().entries().unwrap().is_empty());
}

#[tokio::test]
async fn ambiguous_delete_is_recovered_when_block_is_gone() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Notes");
    let block = h.ws.add_text(&page, "paragraph", "stale");
    h.ws.fail_after_apply(RemoteOp::DeleteBlock, RemoteError::server(502));

    let outcome = h.editor.delete_block(&block).await.unwrap();
    assert!(outcome.recovered);
    assert_eq!(outcome.value, json!({ "deleted": block }));
    assert!(h.ws.texts_of(&page).is_empty());
}

#[tokio::test]
async fn delete_of_missing_block_is_not_found_and_released() {
    let h = harness();

    let err = h.editor.delete_block("no-such-block").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.editor.coordinator().store().entries().unwrap().is_empty());
    assert_eq!(h.audit.events()[0].error_kind, Some(ErrorKind::NotFound));
}

// ============================================================================
// page.create / page.update
// ============================================================================

#[tokio::test]
async fn ambiguous_page_create_is_recovered_by_title_search() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Projects");
    h.ws.add_page("elsewhere", "Roadmap");
    h.ws.fail_after_apply(RemoteOp::CreatePage, RemoteError::timeout());

    let outcome = h
        .editor
        .create_page(&db, "Roadmap", json!({}), vec![para("first line")])
        .await
        .unwrap();
    assert!(outcome.recovered);
    assert_eq!(outcome.value["title"], json!("Roadmap"));
    assert_eq!(outcome.value["parent_id"], json!(db));
    assert_eq!(h.ws.pages_under(&db).len(), 1);
}

#[tokio::test]
async fn page_create_recovers_the_new_page_beside_a_same_titled_one() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Projects");
    let older = h.ws.add_page(&db, "Weekly");
    h.ws.fail_after_apply(RemoteOp::CreatePage, RemoteError::timeout());

    let outcome = h
        .editor
        .create_page(&db, "Weekly", json!({}), vec![])
        .await
        .unwrap();
    assert!(outcome.recovered);
    assert_ne!(outcome.value["id"], json!(older));
    assert_eq!(h.ws.pages_under(&db).len(), 2);
}

#[tokio::test]
async fn same_titled_page_does_not_confirm_a_lost_create() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Projects");
    h.ws.add_page(&db, "Weekly");
    h.ws.fail_next(RemoteOp::CreatePage, RemoteError::timeout());

    let err = h
        .editor
        .create_page(&db, "Weekly", json!({}), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Unconfirmed { .. }), "{err}");
    assert_eq!(h.ws.pages_under(&db).len(), 1);

    let retry = h
        .editor
        .create_page(&db, "Weekly", json!({}), vec![])
        .await
        .unwrap();
    assert!(!retry.replayed);
    assert_eq!(h.ws.pages_under(&db).len(), 2);
}

#[tokio::test]
async fn page_update_rejects_unknown_properties_before_writing() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Tasks");
    h.ws.define_schema(&db, &[("Name", "title"), ("Status", "select")]);
    let task = h.ws.add_page(&db, "Write docs");

    let err = h
        .editor
        .update_page(&task, &db, json!({ "Owner": "sam", "Status": "Done" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().contains("Owner"), "{err}");
    assert!(!err.to_string().contains("Status"), "{err}");
    assert_eq!(h.ws.calls(RemoteOp::UpdatePage), 0);
    // Cached miss triggered exactly one refresh.
    assert_eq!(h.ws.calls(RemoteOp::RetrieveSchema), 2);
}

#[tokio::test]
async fn page_update_picks_up_newly_added_property() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Tasks");
    h.ws.define_schema(&db, &[("Name", "title")]);
    let task = h.ws.add_page(&db, "Write docs");

    h.editor
        .update_page(&task, &db, json!({ "Name": "Write docs" }))
        .await
        .unwrap();
    h.ws.add_property(&db, "Status", "select");

    let outcome = h
        .editor
        .update_page(&task, &db, json!({ "Status": "Done" }))
        .await
        .unwrap();
    assert_eq!(outcome.value["properties"]["Status"], json!("Done"));
}

#[tokio::test]
async fn page_update_retries_once_after_remote_rejects_known_property() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Tasks");
    h.ws.define_schema(&db, &[("Status", "select")]);
    let task = h.ws.add_page(&db, "Write docs");
    h.ws.fail_next(
        RemoteOp::UpdatePage,
        RemoteError::validation("Status is not a property that exists."),
    );

    let outcome = h
        .editor
        .update_page(&task, &db, json!({ "Status": "Done" }))
        .await
        .unwrap();
    assert!(!outcome.recovered);
    assert_eq!(h.ws.calls(RemoteOp::UpdatePage), 2);
    assert_eq!(h.ws.page(&task).unwrap().properties["Status"], json!("Done"));
}

#[tokio::test]
async fn page_update_reports_property_removed_behind_the_cache() {
    let h = harness();
    let db = h.ws.add_page("workspace", "Tasks");
    h.ws.define_schema(&db, &[("Status", "select")]);
    let task = h.ws.add_page(&db, "Write docs");
    h.editor
        .update_page(&task, &db, json!({ "Status": "Todo" }))
        .await
        .unwrap();

    h.ws.remove_property(&db, "Status");
    let err = h
        .editor
        .update_page(&task, &db, json!({ "Status": "Done" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().contains("Status"), "{err}");
    assert_eq!(h.ws.calls(RemoteOp::UpdatePage), 2, "no blind retry");
}

// ============================================================================
// Selector-driven commands
// ============================================================================

#[tokio::test]
async fn insert_before_the_single_todo_paragraph() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().with_type("paragraph").containing("todo");

    let outcome = h
        .editor
        .insert(&page, &selector, Placement::Before, vec![para("Priority")])
        .await
        .unwrap();
    assert_eq!(outcome.value["results"][0]["type"], json!("paragraph"));
    assert_eq!(
        h.ws.texts_of(&page),
        vec![
            "Tasks",
            "Priority",
            "TODO: write docs",
            "notes from standup",
            "todo: ship it",
            "done"
        ]
    );
}

#[tokio::test]
async fn insert_before_first_child_goes_to_start() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().with_type("heading_1");

    h.editor
        .insert(&page, &selector, Placement::Before, vec![para("Preface")])
        .await
        .unwrap();
    assert_eq!(h.ws.texts_of(&page)[..2], ["Preface", "Tasks"]);
}

#[tokio::test]
async fn ambiguous_insert_target_is_rejected_without_writing() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().containing("todo");

    let err = h
        .editor
        .insert(&page, &selector, Placement::After, vec![para("x")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().contains("2 blocks matched"), "{err}");
    assert_eq!(h.ws.calls(RemoteOp::AppendChildren), 0);
    assert!(h.editor.coordinator().store().entries().unwrap().is_empty());
}

#[tokio::test]
async fn ambiguous_insert_failure_is_recovered_at_resolved_anchor() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().with_type("bulleted_list_item");
    h.ws.fail_after_apply(RemoteOp::AppendChildren, RemoteError::timeout());

    let outcome = h
        .editor
        .insert(&page, &selector, Placement::After, vec![para("owner: sam")])
        .await
        .unwrap();
    assert!(outcome.recovered);
    assert_eq!(h.ws.texts_of(&page)[4], "owner: sam");
}

#[tokio::test]
async fn lost_insert_next_to_identical_sibling_is_unconfirmed() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().containing("notes from standup");
    h.ws.fail_next(RemoteOp::AppendChildren, RemoteError::timeout());

    let err = h
        .editor
        .insert(&page, &selector, Placement::Before, vec![para("notes from standup")])
        .await
        .unwrap_err();
    assert!(matches!(err, FolioError::Unconfirmed { .. }), "{err}");
    assert_eq!(h.ws.texts_of(&page).len(), 5);
}

#[tokio::test]
async fn delete_matching_counts_from_end() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().with_type("paragraph").nth(1).from_end();

    h.editor.delete_matching(&page, &selector).await.unwrap();
    assert_eq!(
        h.ws.texts_of(&page),
        vec!["Tasks", "TODO: write docs", "notes from standup", "todo: ship it"]
    );
}

#[tokio::test]
async fn nth_beyond_matches_is_not_found() {
    let h = harness();
    let page = seed_tasks(&h.ws);
    let selector = Selector::new().containing("todo").nth(3);

    let err = h.editor.delete_matching(&page, &selector).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.ws.calls(RemoteOp::DeleteBlock), 0);
}

#[tokio::test]
async fn select_reports_ambiguity_with_every_match() {
    let h = harness();
    let page = seed_tasks(&h.ws);

    let resolution = h
        .editor
        .select(&page, &Selector::new().containing("TODO"))
        .await
        .unwrap();
    assert!(resolution.ambiguous);
    assert!(resolution.selected.is_none());
    let texts: Vec<&str> = resolution.matches.iter().map(|b| b.text.as_str()).collect();
    assert_eq!(texts, vec!["TODO: write docs", "todo: ship it"]);

    let resolution = h
        .editor
        .select(&page, &Selector::new().containing("TODO").nth(2))
        .await
        .unwrap();
    assert_eq!(resolution.selected.unwrap().block_type, "bulleted_list_item");
}

#[tokio::test]
async fn select_walks_nested_blocks() {
    let h = harness();
    let page = h.ws.add_page("workspace", "Outline");
    h.ws.add_block(
        &page,
        json!({
            "type": "toggle",
            "toggle": {
                "rich_text": [{ "plain_text": "Details" }],
                "children": [para("nested todo")]
            }
        }),
    );

    let resolution = h
        .editor
        .select(&page, &Selector::new().containing("todo"))
        .await
        .unwrap();
    let block = resolution.selected.unwrap();
    assert_eq!(block.depth, 1);
    assert_ne!(block.parent_id, page);
}

// ============================================================================
// Ambient failure handling
// ============================================================================

/// Memory backend whose writes start failing after a fixed number succeed.
#[derive(Debug)]
struct FlakyBackend {
    inner: MemoryBackend,
    writes_left: AtomicUsize,
}

struct FlakyAccess<'a> {
    inner: Box<dyn ExclusiveAccess + 'a>,
    writes_left: &'a AtomicUsize,
}

impl ExclusiveAccess for FlakyAccess<'_> {
    fn read(&mut self) -> StoreResult<EntryMap> {
        self.inner.read()
    }

    fn write(&mut self, entries: &EntryMap) -> StoreResult<()> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.write(entries)
    }
}

impl StoreBackend for FlakyBackend {
    fn acquire(&self) -> StoreResult<Box<dyn ExclusiveAccess + '_>> {
        Ok(Box::new(FlakyAccess {
            inner: self.inner.acquire()?,
            writes_left: &self.writes_left,
        }))
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}

#[tokio::test]
async fn write_succeeds_even_when_outcome_cannot_be_stored() {
    let ws = Arc::new(MemoryWorkspace::new());
    let page = ws.add_page("workspace", "Notes");
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        writes_left: AtomicUsize::new(1),
    };
    let store = Arc::new(IdempotencyStore::open(backend, StoreConfig::default()));
    let audit = Arc::new(MemoryAuditSink::new());
    let coordinator = MutationCoordinator::new(store, audit.clone(), coordinator_config());
    let service: Arc<dyn DocumentService> = ws.clone();
    let editor = DocumentEditor::new(service, coordinator);

    let outcome = editor
        .append(&page, vec![para("kept")], InsertPosition::End)
        .await
        .unwrap();
    assert!(outcome.persistence_degraded);
    assert_eq!(ws.texts_of(&page), vec!["kept"]);
    assert!(audit.events()[0].persistence_degraded);
}

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(std::io::Error::other("read-only filesystem").into())
    }
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_write() {
    let ws = Arc::new(MemoryWorkspace::new());
    let page = ws.add_page("workspace", "Notes");
    let store = Arc::new(IdempotencyStore::in_memory(StoreConfig::default()));
    let coordinator = MutationCoordinator::new(store, Arc::new(BrokenSink), coordinator_config());
    let service: Arc<dyn DocumentService> = ws.clone();
    let editor = DocumentEditor::new(service, coordinator);

    editor
        .append(&page, vec![para("still written")], InsertPosition::End)
        .await
        .unwrap();
    assert_eq!(ws.texts_of(&page), vec!["still written"]);
}

#[tokio::test]
async fn editors_sharing_a_store_file_deduplicate() {
    let dir = tempfile::tempdir().unwrap();
    let config = FolioConfig::from_toml_str(&format!(
        r#"
        [idempotency]
        path = "{store}"

        [audit]
        path = "{audit}"
        "#,
        store = dir.path().join("idempotency.json").display(),
        audit = dir.path().join("audit.jsonl").display(),
    ))
    .unwrap();

    let ws = Arc::new(MemoryWorkspace::new());
    let page = ws.add_page("workspace", "Notes");
    let service: Arc<dyn DocumentService> = ws.clone();
    let first = DocumentEditor::from_config(Arc::clone(&service), &config).unwrap();
    let second = DocumentEditor::from_config(service, &config).unwrap();

    let a = first
        .append(&page, vec![para("once")], InsertPosition::End)
        .await
        .unwrap();
    let b = second
        .append(&page, vec![para("once")], InsertPosition::End)
        .await
        .unwrap();

    assert!(!a.replayed);
    assert!(b.replayed);
    assert_eq!(ws.calls(RemoteOp::AppendChildren), 1);

    let log = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    let events: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["replayed"], json!(true));
    assert!(!log.contains(&a.idempotency_key), "raw key is never logged");
}
