//! Write-ahead log: entries, writer, and reader (spec.md §4.2, C2).
//!
//! Format: one `{op, ...}` JSON object per line, newline-terminated.
//! Writing always appends; reading always streams forward. Corruption
//! handling is governed by [`wise_json_core::WalReadOptions`]: a
//! truncated trailing line is always treated as a recoverable skip,
//! regardless of `strict`, since a torn last line is the expected shape
//! of a crash mid-append.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use wise_json_core::WalReadOptions;

/// A single write-ahead log entry. The `op` discriminant matches
/// spec.md §6's on-disk vocabulary exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op")]
pub enum WalEntry {
    /// Insert a new document.
    INSERT {
        /// The full document as stored (with `_id`/`createdAt`/`updatedAt`).
        doc: serde_json::Value,
    },
    /// Merge `patch` into the document with id `id`.
    UPDATE {
        /// Target document id.
        id: String,
        /// Fields to merge in.
        patch: serde_json::Value,
    },
    /// Remove the document with id `id`.
    REMOVE {
        /// Target document id.
        id: String,
    },
    /// Empty the collection, preserving index definitions.
    CLEAR,
    /// Register a new index definition.
    INDEX_CREATE {
        /// Indexed field name.
        field: String,
        /// `true` for a unique index.
        unique: bool,
    },
    /// Drop an index definition.
    INDEX_DROP {
        /// Indexed field name.
        field: String,
    },
    /// Marks the start of a cross-collection transaction's entries in
    /// this collection's WAL.
    TXN_BEGIN {
        /// Transaction id, shared across every collection it touches.
        txn_id: String,
    },
    /// Marks that the transaction `txn_id` committed; everything
    /// between a `TXN_BEGIN` and its matching `TXN_COMMIT` is only
    /// live if this marker is present (spec.md §4.8).
    TXN_COMMIT {
        /// Transaction id being closed out.
        txn_id: String,
    },
}

/// Errors produced by the WAL writer/reader.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O failure opening, writing, or reading the WAL file.
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    /// A WAL line failed to parse and recovery was not configured to
    /// skip past it (spec.md §4.2: "otherwise fail with 'corrupted
    /// WAL'").
    #[error("corrupted WAL at line {line}: {reason}")]
    Corrupted {
        /// 1-indexed line number within the WAL file.
        line: usize,
        /// Parse failure detail.
        reason: String,
    },
}

/// Appends entries to a collection's WAL file.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    force_sync: bool,
    /// Count of entries appended since the last `truncate` call —
    /// the collection core uses this to drive the
    /// `maxWalEntriesBeforeCheckpoint` trigger.
    entries_since_truncate: u64,
}

impl WalWriter {
    /// Open (creating if absent) the WAL file at `path` for appending.
    pub fn open(path: impl Into<PathBuf>, force_sync: bool) -> Result<Self, WalError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(WalWriter {
            path,
            file,
            force_sync,
            entries_since_truncate: 0,
        })
    }

    /// Append one entry as a single newline-terminated JSON line.
    pub fn append(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| WalError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        if self.force_sync {
            self.file.sync_data()?;
        }
        self.entries_since_truncate += 1;
        Ok(())
    }

    /// Number of entries appended since the WAL was last truncated
    /// (reset to zero by a successful checkpoint).
    pub fn entries_since_truncate(&self) -> u64 {
        self.entries_since_truncate
    }

    /// Atomically replace the WAL file with an empty one, called after
    /// a successful checkpoint (spec.md §4.2's compaction contract).
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.entries_since_truncate = 0;
        debug!(path = %self.path.display(), "WAL truncated after checkpoint");
        Ok(())
    }

    /// Force all buffered writes to durable storage now, independent of
    /// `force_sync`. Used by `flushToDisk()`.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Path of the underlying WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every parseable entry from the WAL at `path`, honoring
/// `options`. A missing WAL file yields an empty vec (a fresh
/// collection has none yet).
pub fn read_wal(path: &Path, options: WalReadOptions) -> Result<Vec<WalEntry>, WalError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut lines = reader.lines().peekable();
    let mut line_no = 0usize;

    while let Some(line) = lines.next() {
        line_no += 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                let is_last_line = lines.peek().is_none();
                if is_last_line {
                    // A truncated trailing line is always a recoverable
                    // skip, regardless of `strict`.
                    warn!(path = %path.display(), line = line_no, "skipping truncated trailing WAL line");
                    continue;
                }
                if options.recover && !options.strict {
                    warn!(path = %path.display(), line = line_no, error = %e, "skipping corrupted WAL line");
                    continue;
                }
                return Err(WalError::Corrupted {
                    line: line_no,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        let mut w = WalWriter::open(&path, false).unwrap();
        w.append(&WalEntry::INSERT { doc: json!({"_id": "a"}) }).unwrap();
        w.append(&WalEntry::REMOVE { id: "a".into() }).unwrap();
        drop(w);

        let entries = read_wal(&path, WalReadOptions::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], WalEntry::INSERT { .. }));
        assert!(matches!(entries[1], WalEntry::REMOVE { .. }));
    }

    #[test]
    fn missing_wal_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.wal");
        let entries = read_wal(&path, WalReadOptions::default()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn truncate_resets_entry_counter_and_empties_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        let mut w = WalWriter::open(&path, false).unwrap();
        w.append(&WalEntry::CLEAR).unwrap();
        assert_eq!(w.entries_since_truncate(), 1);
        w.truncate().unwrap();
        assert_eq!(w.entries_since_truncate(), 0);
        drop(w);
        let entries = read_wal(&path, WalReadOptions::default()).unwrap();
        assert!(entries.is_empty());
    }

    /// S6 — corrupted WAL line between two valid inserts is skipped
    /// under `recover=true, strict=false`, and the surrounding entries
    /// still come through.
    #[test]
    fn corrupted_middle_line_is_skipped_when_recover_enabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc1"}}}}"#).unwrap();
            writeln!(f, "not json at all").unwrap();
            writeln!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc2"}}}}"#).unwrap();
            writeln!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc3"}}}}"#).unwrap();
        }
        let entries = read_wal(&path, WalReadOptions { recover: true, strict: false }).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn corrupted_middle_line_fails_read_when_strict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc1"}}}}"#).unwrap();
            writeln!(f, "not json at all").unwrap();
        }
        let result = read_wal(&path, WalReadOptions { recover: false, strict: true });
        assert!(matches!(result, Err(WalError::Corrupted { .. })));
    }

    #[test]
    fn truncated_trailing_line_is_always_recoverable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc1"}}}}"#).unwrap();
            write!(f, r#"{{"op":"INSERT","doc":{{"_id":"doc2"#).unwrap(); // no closing, no newline
        }
        let entries = read_wal(&path, WalReadOptions { recover: false, strict: true }).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
