//! Atomic file writes and crash-safe reads (spec.md §4.1, C1).
//!
//! Writing: given a target path `P` and bytes `B`, write to a temp file
//! `P.tmp.<uuid>`, fsync it, then rename it onto `P`. If `P` already
//! exists, a best-effort rename of the old `P` to `P.bak` precedes the
//! write (renames across the crash-safety boundary are cheap and the
//! old content survives a crash mid-write as a fallback).
//!
//! Reading: on a suspected-torn file, recovery tries `P`, then `P.bak`,
//! then `P.new` (a filename some writers use for the temp file instead
//! of the `P.tmp.<uuid>` scheme — recognized so recovery is tolerant of
//! either convention); the first one that parses wins, and any
//! remaining stragglers are left on disk untouched (the caller decides
//! whether to clean them up, e.g. the checkpoint manager's orphan-
//! segment handling in `checkpoint.rs`).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Write `bytes` to `path` atomically: temp file, fsync, rename.
///
/// Returns the number of bytes written. If `path` already exists, it is
/// best-effort renamed to `path.bak` first; failure to do so (e.g. no
/// prior file) is not an error.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<usize> {
    if path.exists() {
        let bak = backup_path(path);
        if let Err(e) = fs::rename(path, &bak) {
            debug!(path = %path.display(), error = %e, "no prior file to back up (or rename failed); continuing");
        }
    }

    let tmp = temp_path(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        // Best-effort directory fsync so the rename itself survives a
        // crash; not all platforms support syncing a directory handle.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(bytes.len())
}

/// Serialize `value` as JSON (pretty-printed with `indent` spaces, or
/// compact if `indent` is `None`) and write it atomically to `path`.
pub fn atomic_write_json<T: Serialize>(
    path: &Path,
    value: &T,
    indent: Option<usize>,
) -> io::Result<usize> {
    let bytes = match indent {
        Some(n) => {
            let indent_str = " ".repeat(n);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent_str.as_bytes());
            let mut buf = Vec::new();
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            value
                .serialize(&mut ser)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf
        }
        None => serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
    };
    atomic_write(path, &bytes)
}

/// Read and parse JSON from `path`, falling back to `path.bak` and then
/// `path.new` if the primary file is missing or fails to parse.
/// Returns `None` if none of the three candidates parse.
pub fn read_json_with_recovery<T: DeserializeOwned>(path: &Path) -> Option<T> {
    for candidate in [path.to_path_buf(), backup_path(path), new_path(path)] {
        if !candidate.exists() {
            continue;
        }
        match fs::read(&candidate) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(v) => return Some(v),
                Err(e) => warn!(path = %candidate.display(), error = %e, "failed to parse candidate, trying next"),
            },
            Err(e) => warn!(path = %candidate.display(), error = %e, "failed to read candidate, trying next"),
        }
    }
    None
}

fn backup_path(path: &Path) -> PathBuf {
    append_suffix(path, ".bak")
}

fn new_path(path: &Path) -> PathBuf {
    append_suffix(path, ".new")
}

fn temp_path(path: &Path) -> PathBuf {
    append_suffix(path, &format!(".tmp.{}", Uuid::new_v4()))
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        v: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write_json(&path, &Payload { v: 7 }, Some(2)).unwrap();
        let read: Payload = read_json_with_recovery(&path).unwrap();
        assert_eq!(read, Payload { v: 7 });
    }

    #[test]
    fn second_write_backs_up_prior_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write_json(&path, &Payload { v: 1 }, None).unwrap();
        atomic_write_json(&path, &Payload { v: 2 }, None).unwrap();
        assert!(backup_path(&path).exists());
        let read: Payload = read_json_with_recovery(&path).unwrap();
        assert_eq!(read, Payload { v: 2 });
    }

    #[test]
    fn recovery_falls_back_to_backup_when_primary_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write_json(&path, &Payload { v: 1 }, None).unwrap();
        atomic_write_json(&path, &Payload { v: 2 }, None).unwrap();
        // Corrupt the primary file directly.
        fs::write(&path, b"{not json").unwrap();
        let read: Payload = read_json_with_recovery(&path).unwrap();
        assert_eq!(read, Payload { v: 1 });
    }

    #[test]
    fn recovery_returns_none_when_nothing_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Payload> = read_json_with_recovery(&path);
        assert!(read.is_none());
    }

    #[test]
    fn no_temp_files_remain_after_a_successful_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        atomic_write_json(&path, &Payload { v: 1 }, None).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
