//! Canonical request hashing and idempotency key derivation.
//!
//! An idempotency key is `command:bucket:digest` where `bucket` is the index
//! of a coarse wall-clock window and `digest` hashes the command together with
//! the canonicalised request shape. Canonicalisation sorts object keys
//! recursively, so field order never changes the key.
//!
//! Once the bucket rolls over an identical request gets a new key and is
//! treated as a new mutation. Deduplication is deliberately bounded in time.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters of the request digest kept in a key.
const KEY_DIGEST_LEN: usize = 32;

/// Separator between idempotency key and command in a composite key.
const COMPOSITE_SEPARATOR: char = '\u{0}';

/// Rebuild `value` with every object's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    // Serializing a serde_json::Value cannot fail.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// SHA-256 of `data`, hex encoded.
pub fn hash_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Hash of the canonical request shape. Stored alongside every entry so a
/// reused key carrying a different request is detected.
pub fn request_hash(request: &Value) -> String {
    hash_hex(canonical_json(request))
}

/// Join an idempotency key with its command name.
///
/// Identical idempotency keys used by different commands never share an entry.
pub fn composite_key(key: &str, command: &str) -> String {
    format!("{key}{COMPOSITE_SEPARATOR}{command}")
}

/// A derived idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// Command name the key was derived for.
    pub command: String,
    /// Index of the time window the request fell into.
    pub bucket: u64,
    /// Truncated hash of command + canonical request.
    pub digest: String,
}

impl IdempotencyKey {
    /// Derive the key for `request` issued at `now_millis`.
    ///
    /// A zero `bucket` width is treated as one millisecond.
    pub fn derive(command: &str, request: &Value, now_millis: u64, bucket: Duration) -> Self {
        let width = (bucket.as_millis() as u64).max(1);
        let mut material = String::with_capacity(command.len() + 64);
        material.push_str(command);
        material.push('\n');
        material.push_str(&canonical_json(request));
        let mut digest = hash_hex(material);
        digest.truncate(KEY_DIGEST_LEN);
        Self {
            command: command.to_string(),
            bucket: now_millis / width,
            digest,
        }
    }

    /// The composite store key for this idempotency key.
    pub fn composite(&self) -> String {
        composite_key(&self.to_string(), &self.command)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.command, self.bucket, self.digest)
    }
}
