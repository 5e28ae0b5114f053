//! The document type and its three reserved keys.
//!
//! A document is a JSON object. Three keys are managed by the engine:
//! `_id` (assigned at insert if absent), `createdAt` (set once) and
//! `updatedAt` (refreshed on every mutation). Two more keys carry TTL
//! information and are read, never written, by the engine: `expireAt`
//! and `ttl`. See [`crate::ttl`] in `wise-json-storage` for liveness
//! semantics built on top of these two fields.

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Reserved key holding the document's unique id within a collection.
pub const ID_FIELD: &str = "_id";
/// Reserved key holding the ISO-8601 creation timestamp, set once.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Reserved key holding the ISO-8601 last-modification timestamp.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Optional key: absolute expiry time in epoch milliseconds.
pub const EXPIRE_AT_FIELD: &str = "expireAt";
/// Optional key: relative expiry in milliseconds from `createdAt`.
pub const TTL_FIELD: &str = "ttl";

/// A document: a JSON object with engine-managed reserved keys.
///
/// Internally this is just a `serde_json::Map`; `Document` exists to
/// centralize the reserved-key bookkeeping so `Collection` never hand-
/// rolls it in more than one place.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap an existing JSON object as a document, as-is.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Document(map)
    }

    /// Build a fresh document from caller-supplied fields, assigning
    /// `_id` (via `id_gen` if absent), `createdAt` and `updatedAt`
    /// (both set to `now`).
    pub fn new_inserted(mut fields: Map<String, Value>, id_gen: &dyn IdGenerator, now: &str) -> Self {
        fields
            .entry(ID_FIELD.to_string())
            .or_insert_with(|| Value::String(id_gen.next_id()));
        fields.insert(CREATED_AT_FIELD.to_string(), Value::String(now.to_string()));
        fields.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_string()));
        Document(fields)
    }

    /// The document's `_id`, if it is a string (it always should be
    /// for documents produced by this engine).
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The document's `createdAt` stamp, if present and a string.
    pub fn created_at(&self) -> Option<&str> {
        self.0.get(CREATED_AT_FIELD).and_then(Value::as_str)
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume and return the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Borrow a field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Clone this document as a `serde_json::Value::Object` for egress
    /// to a caller (read results are always cloned, per the
    /// concurrency model: readers observe a snapshot, never a live
    /// alias into collection memory).
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Merge `patch` into this document's fields, refusing to let the
    /// caller change `_id` or `createdAt`, and refreshing `updatedAt`
    /// to `now`. Top-level merge only (patch fields replace document
    /// fields of the same name) — matches spec.md's `update(id, patch)`
    /// contract, which is a merge, not a deep-merge.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>, now: &str) {
        for (k, v) in patch {
            if k == ID_FIELD || k == CREATED_AT_FIELD {
                continue;
            }
            self.0.insert(k.clone(), v.clone());
        }
        self.0
            .insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_string()));
    }
}

/// Produces unique id strings for newly inserted documents.
///
/// The default implementation ([`UuidV4Generator`]) generates a UUID
/// v4 per spec.md §3. Callers may supply their own generator via
/// `CollectionConfig::id_generator` (spec.md §6's `idGenerator` option).
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh, unique id string.
    fn next_id(&self) -> String;
}

/// Default [`IdGenerator`]: random UUID v4, rendered as a hyphenated
/// lowercase string.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Current time, rendered the way `createdAt`/`updatedAt` are stamped:
/// an ISO-8601 timestamp in UTC with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn new_inserted_assigns_id_when_absent() {
        let fields = obj(json!({"name": "alice"}));
        let doc = Document::new_inserted(fields, &UuidV4Generator, "2026-01-01T00:00:00.000Z");
        assert!(doc.id().is_some());
        assert_eq!(doc.created_at(), Some("2026-01-01T00:00:00.000Z"));
    }

    #[test]
    fn new_inserted_preserves_caller_supplied_id() {
        let fields = obj(json!({"_id": "fixed", "name": "bob"}));
        let doc = Document::new_inserted(fields, &UuidV4Generator, "now");
        assert_eq!(doc.id(), Some("fixed"));
    }

    #[test]
    fn apply_patch_ignores_id_and_created_at_but_refreshes_updated_at() {
        let fields = obj(json!({"_id": "a", "createdAt": "t0", "updatedAt": "t0", "v": 1}));
        let mut doc = Document::from_map(fields);
        let patch = obj(json!({"_id": "hacked", "createdAt": "t1", "v": 2}));
        doc.apply_patch(&patch, "t1");
        assert_eq!(doc.id(), Some("a"));
        assert_eq!(doc.created_at(), Some("t0"));
        assert_eq!(doc.get("v"), Some(&json!(2)));
        assert_eq!(doc.get("updatedAt"), Some(&json!("t1")));
    }

    #[test]
    fn uuid_generator_produces_unique_ids() {
        let gen = UuidV4Generator;
        assert_ne!(gen.next_id(), gen.next_id());
    }
}
