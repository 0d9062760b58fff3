//! Remote block representation and its flattened projection.
//!
//! A [`RemoteBlock`] is what the remote service hands back: an id, a type tag,
//! and a type-specific JSON payload. The payload stays opaque except for the
//! plain-text extraction selectors need.
//!
//! A [`FlatBlock`] is produced by walking a block tree. It is never persisted;
//! it lives only for the duration of one editor call.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A block as reported by the remote document service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteBlock {
    /// Remote block identifier.
    pub id: String,
    /// Block type tag (`paragraph`, `heading_1`, `to_do`, ...).
    #[serde(rename = "type")]
    pub block_type: String,
    /// Direct parent (page or block). Absent on freshly-built payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Whether the block has its own children.
    #[serde(default)]
    pub has_children: bool,
    /// Remote last-modified timestamp, opaque but ordered per block.
    #[serde(default)]
    pub last_edited_time: String,
    /// Archived (deleted) blocks are still addressable on some services.
    #[serde(default)]
    pub archived: bool,
    /// Type-specific payload (the object stored under the type key).
    #[serde(default)]
    pub content: Value,
}

impl RemoteBlock {
    /// Plain text of the block's rich text, concatenated.
    pub fn plain_text(&self) -> String {
        plain_text_of(&self.content)
    }

    /// Rebuild the `{"type": t, t: {...}}` payload this block was created from.
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert("type".into(), Value::String(self.block_type.clone()));
        payload.insert(self.block_type.clone(), self.content.clone());
        Value::Object(payload)
    }

    /// Build a paragraph-like payload with a single plain text run.
    pub fn text_payload(block_type: &str, text: &str) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert("type".into(), Value::String(block_type.to_string()));
        payload.insert(
            block_type.to_string(),
            json!({
                "rich_text": [{ "type": "text", "text": { "content": text }, "plain_text": text }]
            }),
        );
        Value::Object(payload)
    }
}

/// Extract plain text from a type-specific block payload.
///
/// Reads `rich_text[*].plain_text`, falling back to `rich_text[*].text.content`
/// for payloads that have not round-tripped through the service yet. Pages and
/// child pages carry a `title` string instead.
pub fn plain_text_of(content: &Value) -> String {
    if let Some(runs) = content.get("rich_text").and_then(Value::as_array) {
        return runs
            .iter()
            .filter_map(|run| {
                run.get("plain_text")
                    .and_then(Value::as_str)
                    .or_else(|| run.pointer("/text/content").and_then(Value::as_str))
            })
            .collect();
    }
    content
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Type and text of a `{"type": t, t: {...}}` payload, for matching payloads
/// against blocks the service created from them.
pub fn payload_signature(payload: &Value) -> Option<(String, String)> {
    let block_type = payload.get("type")?.as_str()?.to_string();
    let text = payload
        .get(&block_type)
        .map(plain_text_of)
        .unwrap_or_default();
    Some((block_type, text))
}

/// A block flattened out of its tree, with position metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatBlock {
    /// Remote block identifier.
    pub id: String,
    /// Direct parent (the scope id for top-level blocks).
    pub parent_id: String,
    /// Block type tag.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Flattened plain text.
    pub text: String,
    /// Whether the block has its own children.
    pub has_children: bool,
    /// Remote last-modified timestamp.
    pub last_edited_time: String,
    /// Position among direct siblings under `parent_id`.
    pub sibling_index: usize,
    /// Global depth-first, pre-order position.
    pub order_index: usize,
    /// Nesting depth below the scope (top-level blocks are 0).
    pub depth: usize,
}

impl FlatBlock {
    /// Project a remote block into its flattened form.
    pub fn from_remote(
        block: &RemoteBlock,
        parent_id: &str,
        sibling_index: usize,
        order_index: usize,
        depth: usize,
    ) -> Self {
        Self {
            id: block.id.clone(),
            parent_id: parent_id.to_string(),
            block_type: block.block_type.clone(),
            text: block.plain_text(),
            has_children: block.has_children,
            last_edited_time: block.last_edited_time.clone(),
            sibling_index,
            order_index,
            depth,
        }
    }

    /// `id:lastEditedTime`, the unit a sibling fingerprint is built from.
    pub fn fingerprint_part(&self) -> String {
        format!("{}:{}", self.id, self.last_edited_time)
    }
}
