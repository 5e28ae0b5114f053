//! Checkpoint writing, reading, and retention (spec.md §4.3, C3).
//!
//! A checkpoint is a meta file naming N data segment files; segments
//! partition the document stream by cumulative serialized size, never
//! exceeding `max_segment_size_bytes`. The meta file is written last —
//! it acts as the commit marker, so a crash mid-checkpoint leaves at
//! worst some unreferenced ("orphan") data segments and no meta change.

use crate::atomic::{atomic_write_json, read_json_with_recovery};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use wise_json_core::IndexDef;

/// Errors from checkpoint write/read/prune.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying I/O failure.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of a `checkpoint_meta_<collection>_<ts>.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// ISO-8601 creation timestamp (colons intact here; only the
    /// filename replaces colons with hyphens).
    pub created_at: String,
    /// Data segment filenames, in document order.
    pub segments: Vec<String>,
    /// Index definitions active at snapshot time.
    pub indexes: Vec<IndexDef>,
    /// Total documents across all segments.
    pub document_count: usize,
}

/// Result of a successful checkpoint write.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Timestamp token used in this checkpoint's filenames.
    pub timestamp_token: String,
    /// The written meta file's path.
    pub meta_path: PathBuf,
    /// Number of documents captured.
    pub document_count: usize,
}

/// Loaded checkpoint state: the documents (insertion order preserved)
/// and the index definitions active when the checkpoint was taken.
#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    /// Documents, in original insertion order.
    pub documents: Vec<serde_json::Value>,
    /// Index definitions active at snapshot time.
    pub indexes: Vec<IndexDef>,
}

fn timestamp_token(now: &str) -> String {
    now.replace(':', "-")
}

fn meta_path(dir: &Path, collection: &str, token: &str) -> PathBuf {
    dir.join(format!("checkpoint_meta_{collection}_{token}.json"))
}

fn segment_path(dir: &Path, collection: &str, token: &str, seg: usize) -> PathBuf {
    dir.join(format!("checkpoint_data_{collection}_{token}_seg{seg}.json"))
}

fn segment_filename(collection: &str, token: &str, seg: usize) -> String {
    format!("checkpoint_data_{collection}_{token}_seg{seg}.json")
}

/// Write a new checkpoint for `collection` into `dir` (the collection's
/// `_checkpoints` directory, created if absent).
///
/// `documents` is the full live document set, in insertion order.
/// `now` is an ISO-8601 timestamp supplied by the caller (so tests can
/// pin it and successive checkpoints never collide on the same
/// second).
pub fn write_checkpoint(
    dir: &Path,
    collection: &str,
    documents: &[serde_json::Value],
    indexes: &[IndexDef],
    max_segment_size_bytes: usize,
    json_indent: Option<usize>,
    now: &str,
) -> Result<CheckpointInfo, CheckpointError> {
    fs::create_dir_all(dir)?;
    let token = timestamp_token(now);

    let mut segments = Vec::new();
    let mut current: Vec<serde_json::Value> = Vec::new();
    let mut current_size: usize = 0;
    let mut seg_index = 0usize;

    let flush = |dir: &Path,
                 collection: &str,
                 token: &str,
                 seg_index: usize,
                 batch: &[serde_json::Value],
                 json_indent: Option<usize>|
     -> Result<String, CheckpointError> {
        let path = segment_path(dir, collection, token, seg_index);
        atomic_write_json(&path, &batch.to_vec(), json_indent)?;
        Ok(segment_filename(collection, token, seg_index))
    };

    for doc in documents {
        let doc_size = serde_json::to_vec(doc).map(|b| b.len()).unwrap_or(0);
        if !current.is_empty() && current_size + doc_size > max_segment_size_bytes {
            segments.push(flush(dir, collection, &token, seg_index, &current, json_indent)?);
            seg_index += 1;
            current.clear();
            current_size = 0;
        }
        current_size += doc_size;
        current.push(doc.clone());
    }
    if !current.is_empty() || segments.is_empty() {
        segments.push(flush(dir, collection, &token, seg_index, &current, json_indent)?);
    }

    let meta = CheckpointMeta {
        created_at: now.to_string(),
        segments,
        indexes: indexes.to_vec(),
        document_count: documents.len(),
    };
    let meta_path = meta_path(dir, collection, &token);
    atomic_write_json(&meta_path, &meta, json_indent)?;
    info!(collection, documents = documents.len(), segments = meta.segments.len(), "checkpoint written");

    Ok(CheckpointInfo {
        timestamp_token: token,
        meta_path,
        document_count: meta.document_count,
    })
}

/// Enumerate meta files for `collection` in `dir`, newest first, by
/// the timestamp token embedded in the filename (lexicographic sort is
/// correct because the token is an ISO-8601 timestamp with `:`→`-`,
/// which preserves chronological order).
fn list_meta_files(dir: &Path, collection: &str) -> Vec<PathBuf> {
    let prefix = format!("checkpoint_meta_{collection}_");
    let mut metas: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    metas.sort();
    metas.reverse();
    metas
}

/// Load the newest checkpoint for `collection` whose every referenced
/// data segment exists and parses. Falls back to the next newest on
/// failure; returns `Ok(None)` (empty state, not an error) if no
/// checkpoint at all is usable.
pub fn load_latest_checkpoint(dir: &Path, collection: &str) -> Result<Option<LoadedCheckpoint>, CheckpointError> {
    for meta_path in list_meta_files(dir, collection) {
        let meta: Option<CheckpointMeta> = read_json_with_recovery(&meta_path);
        let Some(meta) = meta else {
            warn!(path = %meta_path.display(), "checkpoint meta failed to parse, trying older checkpoint");
            continue;
        };

        let mut documents = Vec::with_capacity(meta.document_count);
        let mut ok = true;
        for seg_name in &meta.segments {
            let seg_path = dir.join(seg_name);
            match read_json_with_recovery::<Vec<serde_json::Value>>(&seg_path) {
                Some(mut docs) => documents.append(&mut docs),
                None => {
                    warn!(path = %seg_path.display(), "checkpoint segment missing or unparseable, trying older checkpoint");
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return Ok(Some(LoadedCheckpoint {
                documents,
                indexes: meta.indexes,
            }));
        }
    }
    Ok(None)
}

/// Keep only the `keep` newest checkpoint generations for `collection`;
/// delete older meta files and every data segment that is not
/// referenced by a surviving meta. An orphan segment (one whose own
/// meta is itself unparseable/absent) is left alone here — it is
/// cleaned up the next time a checkpoint actually succeeds, per
/// spec.md §4.3.
pub fn prune_old_checkpoints(dir: &Path, collection: &str, keep: usize) -> Result<(), CheckpointError> {
    let metas = list_meta_files(dir, collection);
    if metas.len() <= keep {
        return Ok(());
    }

    let (survivors, stale) = metas.split_at(keep);

    let mut surviving_segments = std::collections::HashSet::new();
    for meta_path in survivors {
        if let Some(meta) = read_json_with_recovery::<CheckpointMeta>(meta_path) {
            for s in meta.segments {
                surviving_segments.insert(s);
            }
        }
    }

    for meta_path in stale {
        let stale_meta: Option<CheckpointMeta> = read_json_with_recovery(meta_path);
        if let Some(meta) = stale_meta {
            for seg in meta.segments {
                if !surviving_segments.contains(&seg) {
                    let _ = fs::remove_file(dir.join(&seg));
                }
            }
        }
        let _ = fs::remove_file(meta_path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn idx() -> Vec<IndexDef> {
        vec![IndexDef::unique("email")]
    }

    #[test]
    fn write_then_load_round_trips_documents_and_indexes() {
        let dir = tempdir().unwrap();
        let docs = vec![json!({"_id": "a", "v": 1}), json!({"_id": "b", "v": 2})];
        write_checkpoint(dir.path(), "users", &docs, &idx(), 1024 * 1024, Some(2), "2026-01-01T00-00-00.000Z").unwrap();

        let loaded = load_latest_checkpoint(dir.path(), "users").unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 2);
        assert_eq!(loaded.indexes, idx());
    }

    #[test]
    fn empty_checkpoint_still_writes_one_empty_segment() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), "users", &[], &[], 1024, None, "t0").unwrap();
        let loaded = load_latest_checkpoint(dir.path(), "users").unwrap().unwrap();
        assert!(loaded.documents.is_empty());
    }

    #[test]
    fn documents_split_across_segments_by_size() {
        let dir = tempdir().unwrap();
        // Each doc serializes to well over 10 bytes; force multiple segments.
        let docs: Vec<_> = (0..20).map(|i| json!({"_id": format!("d{i}"), "payload": "x".repeat(50)})).collect();
        let info = write_checkpoint(dir.path(), "big", &docs, &[], 256, None, "t1").unwrap();
        let metas = list_meta_files(dir.path(), "big");
        let meta: CheckpointMeta = read_json_with_recovery(&metas[0]).unwrap();
        assert!(meta.segments.len() > 1, "expected multiple segments, got {}", meta.segments.len());
        assert_eq!(info.document_count, 20);

        let loaded = load_latest_checkpoint(dir.path(), "big").unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 20);
    }

    /// S5 — with checkpointsToKeep=2, after 4 checkpoints exactly 2
    /// metas remain and every surviving segment matches a surviving
    /// meta.
    #[test]
    fn retention_keeps_only_the_newest_n_generations() {
        let dir = tempdir().unwrap();
        for i in 0..4 {
            let docs = vec![json!({"_id": format!("doc{i}")})];
            write_checkpoint(dir.path(), "c", &docs, &[], 1024, None, &format!("t{i}")).unwrap();
            prune_old_checkpoints(dir.path(), "c", 2).unwrap();
        }
        let metas = list_meta_files(dir.path(), "c");
        assert_eq!(metas.len(), 2);

        let mut referenced = std::collections::HashSet::new();
        for m in &metas {
            let meta: CheckpointMeta = read_json_with_recovery(m).unwrap();
            for seg in meta.segments {
                referenced.insert(seg);
            }
        }
        let data_files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("checkpoint_data_"))
            .collect();
        for f in &data_files {
            assert!(referenced.contains(f), "orphaned data segment left behind: {f}");
        }
    }

    #[test]
    fn load_falls_back_to_older_checkpoint_when_newest_meta_is_corrupt() {
        let dir = tempdir().unwrap();
        write_checkpoint(dir.path(), "c", &[json!({"_id": "old"})], &[], 1024, None, "t0").unwrap();
        write_checkpoint(dir.path(), "c", &[json!({"_id": "new"})], &[], 1024, None, "t1").unwrap();

        let newest_meta = list_meta_files(dir.path(), "c").remove(0);
        fs::write(&newest_meta, b"{not json").unwrap();

        let loaded = load_latest_checkpoint(dir.path(), "c").unwrap().unwrap();
        assert_eq!(loaded.documents[0]["_id"], "old");
    }

    #[test]
    fn load_returns_none_when_no_checkpoint_exists() {
        let dir = tempdir().unwrap();
        let loaded = load_latest_checkpoint(dir.path(), "c").unwrap();
        assert!(loaded.is_none());
    }
}
