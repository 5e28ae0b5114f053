//! Secondary index manager (spec.md §4.4, C4).
//!
//! A standard index maps a canonical value key to the set of document
//! ids sharing that value; a unique index enforces at most one id per
//! key. Indexes are kept consistent with the in-memory document map by
//! `Collection` calling `on_insert`/`on_update`/`on_remove` around every
//! mutation — this module never touches the WAL or disk itself.

use std::collections::{HashMap, HashSet};
use wise_json_core::{canonical_key, IndexDef, IndexType};

/// Error raised when an insert/update would violate a unique index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unique constraint violated on field '{field}' for value {value}")]
pub struct UniqueConstraintViolation {
    /// The indexed field.
    pub field: String,
    /// The canonical key of the conflicting value.
    pub value: String,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    unique: bool,
    map: HashMap<String, HashSet<String>>,
}

impl IndexEntry {
    fn new(unique: bool) -> Self {
        IndexEntry { unique, map: HashMap::new() }
    }

    fn insert(&mut self, key: &str, id: &str) {
        self.map.entry(key.to_string()).or_default().insert(id.to_string());
    }

    fn remove(&mut self, key: &str, id: &str) {
        if let Some(set) = self.map.get_mut(key) {
            set.remove(id);
            if set.is_empty() {
                self.map.remove(key);
            }
        }
    }
}

/// Owns every secondary index defined on a collection.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: HashMap<String, IndexEntry>,
}

impl IndexManager {
    /// An index manager with no indexes defined.
    pub fn new() -> Self {
        IndexManager::default()
    }

    /// Rebuild an index manager from persisted definitions and the
    /// live document set (used during recovery, after loading the
    /// latest checkpoint and replaying the WAL tail).
    pub fn rebuild<'a>(
        defs: &[IndexDef],
        docs: impl IntoIterator<Item = (&'a String, &'a serde_json::Value)> + Clone,
    ) -> Result<Self, UniqueConstraintViolation> {
        let mut mgr = IndexManager::new();
        for def in defs {
            mgr.indexes.insert(def.field_name.clone(), IndexEntry::new(def.is_unique()));
        }
        for (id, doc) in docs {
            mgr.on_insert(id, doc)?;
        }
        Ok(mgr)
    }

    /// Register a new index. Reindexes every document currently passed
    /// in `docs`; fails without mutating state if existing data
    /// violates `unique`.
    pub fn create_index<'a>(
        &mut self,
        field: &str,
        unique: bool,
        docs: impl IntoIterator<Item = (&'a String, &'a serde_json::Value)>,
    ) -> Result<(), UniqueConstraintViolation> {
        let mut entry = IndexEntry::new(unique);
        for (id, doc) in docs {
            if let Some(key) = doc.get(field).and_then(canonical_key) {
                if unique {
                    if let Some(existing) = entry.map.get(&key) {
                        if !existing.is_empty() {
                            return Err(UniqueConstraintViolation { field: field.to_string(), value: key });
                        }
                    }
                }
                entry.insert(&key, id);
            }
        }
        self.indexes.insert(field.to_string(), entry);
        Ok(())
    }

    /// Remove an index definition entirely.
    pub fn drop_index(&mut self, field: &str) {
        self.indexes.remove(field);
    }

    /// Current index definitions, for checkpoint metadata.
    pub fn definitions(&self) -> Vec<IndexDef> {
        self.indexes
            .iter()
            .map(|(field, entry)| {
                if entry.unique {
                    IndexDef::unique(field.clone())
                } else {
                    IndexDef::standard(field.clone())
                }
            })
            .collect()
    }

    /// `true` if `field` has an index, and whether it is unique.
    pub fn index_kind(&self, field: &str) -> Option<IndexType> {
        self.indexes.get(field).map(|e| if e.unique { IndexType::Unique } else { IndexType::Standard })
    }

    /// Validate that inserting `doc` under `id` would not violate any
    /// unique index, without mutating any index. Used for batch
    /// (`insertMany`) all-or-nothing validation.
    pub fn check_insert(&self, id: &str, doc: &serde_json::Value) -> Result<(), UniqueConstraintViolation> {
        for (field, entry) in &self.indexes {
            if !entry.unique {
                continue;
            }
            if let Some(key) = doc.get(field).and_then(canonical_key) {
                if let Some(existing) = entry.map.get(&key) {
                    if existing.iter().any(|existing_id| existing_id != id) {
                        return Err(UniqueConstraintViolation { field: field.clone(), value: key });
                    }
                }
            }
        }
        Ok(())
    }

    /// Insert `doc` (keyed by `id`) into every index. Fails (without
    /// partial mutation) if a unique constraint is violated.
    pub fn on_insert(&mut self, id: &str, doc: &serde_json::Value) -> Result<(), UniqueConstraintViolation> {
        self.check_insert(id, doc)?;
        for (field, entry) in self.indexes.iter_mut() {
            if let Some(key) = doc.get(field).and_then(canonical_key) {
                entry.insert(&key, id);
            }
        }
        Ok(())
    }

    /// Update index entries for `id` going from `old` to `new`.
    /// Unique-constraint checked against `new` first; on violation,
    /// `old` is left untouched.
    pub fn on_update(
        &mut self,
        id: &str,
        old: &serde_json::Value,
        new: &serde_json::Value,
    ) -> Result<(), UniqueConstraintViolation> {
        for (field, entry) in &self.indexes {
            if !entry.unique {
                continue;
            }
            if let Some(key) = new.get(field).and_then(canonical_key) {
                if let Some(existing) = entry.map.get(&key) {
                    if existing.iter().any(|existing_id| existing_id != id) {
                        return Err(UniqueConstraintViolation { field: field.clone(), value: key });
                    }
                }
            }
        }
        for (field, entry) in self.indexes.iter_mut() {
            if let Some(old_key) = old.get(field).and_then(canonical_key) {
                entry.remove(&old_key, id);
            }
            if let Some(new_key) = new.get(field).and_then(canonical_key) {
                entry.insert(&new_key, id);
            }
        }
        Ok(())
    }

    /// Remove `id` (with its last-known value `doc`) from every index.
    pub fn on_remove(&mut self, id: &str, doc: &serde_json::Value) {
        for (field, entry) in self.indexes.iter_mut() {
            if let Some(key) = doc.get(field).and_then(canonical_key) {
                entry.remove(&key, id);
            }
        }
    }

    /// Empty every index's contents while preserving its definitions
    /// (spec.md's `clear()` contract).
    pub fn clear(&mut self) {
        for entry in self.indexes.values_mut() {
            entry.map.clear();
        }
    }

    /// Look up ids for an exact value on `field`, if `field` is
    /// indexed. Returns `None` if there is no index on `field` at all
    /// (distinct from an empty result set, so callers can fall back to
    /// a full scan only when truly unindexed).
    pub fn find_ids(&self, field: &str, value: &serde_json::Value) -> Option<HashSet<String>> {
        let entry = self.indexes.get(field)?;
        let key = canonical_key(value)?;
        Some(entry.map.get(&key).cloned().unwrap_or_default())
    }

    /// `true` if `field` currently has any index (standard or unique).
    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_then_find_by_index() {
        let mut mgr = IndexManager::new();
        mgr.create_index("email", false, std::iter::empty()).unwrap();
        let doc = json!({"_id": "a", "email": "a@x.com"});
        mgr.on_insert("a", &doc).unwrap();
        let ids = mgr.find_ids("email", &json!("a@x.com")).unwrap();
        assert!(ids.contains("a"));
    }

    #[test]
    fn unique_index_rejects_duplicate_value() {
        let mut mgr = IndexManager::new();
        mgr.create_index("email", true, std::iter::empty()).unwrap();
        mgr.on_insert("a", &json!({"_id": "a", "email": "x@y.com"})).unwrap();
        let err = mgr.on_insert("b", &json!({"_id": "b", "email": "x@y.com"})).unwrap_err();
        assert_eq!(err.field, "email");
    }

    #[test]
    fn update_moving_off_a_value_frees_it_for_reuse() {
        let mut mgr = IndexManager::new();
        mgr.create_index("email", true, std::iter::empty()).unwrap();
        mgr.on_insert("a", &json!({"_id": "a", "email": "x@y.com"})).unwrap();
        mgr.on_update("a", &json!({"email": "x@y.com"}), &json!({"email": "new@y.com"})).unwrap();
        mgr.on_insert("b", &json!({"_id": "b", "email": "x@y.com"})).unwrap();
        assert!(mgr.find_ids("email", &json!("x@y.com")).unwrap().contains("b"));
    }

    #[test]
    fn remove_prunes_empty_value_buckets() {
        let mut mgr = IndexManager::new();
        mgr.create_index("email", false, std::iter::empty()).unwrap();
        mgr.on_insert("a", &json!({"_id": "a", "email": "x@y.com"})).unwrap();
        mgr.on_remove("a", &json!({"email": "x@y.com"}));
        assert_eq!(mgr.find_ids("email", &json!("x@y.com")), Some(HashSet::new()));
    }

    #[test]
    fn create_index_on_existing_data_detects_existing_violation() {
        let mut mgr = IndexManager::new();
        let a = "a".to_string();
        let b = "b".to_string();
        let doc_a = json!({"_id": "a", "email": "dup@y.com"});
        let doc_b = json!({"_id": "b", "email": "dup@y.com"});
        let docs = vec![(&a, &doc_a), (&b, &doc_b)];
        let err = mgr.create_index("email", true, docs).unwrap_err();
        assert_eq!(err.field, "email");
    }

    #[test]
    fn clear_empties_values_but_keeps_definitions() {
        let mut mgr = IndexManager::new();
        mgr.create_index("email", true, std::iter::empty()).unwrap();
        mgr.on_insert("a", &json!({"_id": "a", "email": "x@y.com"})).unwrap();
        mgr.clear();
        assert!(mgr.has_index("email"));
        assert_eq!(mgr.find_ids("email", &json!("x@y.com")), Some(HashSet::new()));
    }

    #[test]
    fn unindexed_field_lookup_returns_none() {
        let mgr = IndexManager::new();
        assert_eq!(mgr.find_ids("missing", &json!("v")), None);
    }
}
