//! Exclusive directory lock (part of spec.md §4.6, C6).
//!
//! Held from a collection's first write until it closes; its presence
//! is the single-writer invariant the rest of the engine relies on —
//! no WAL append happens without it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use wise_json_core::error::Error;
use wise_json_core::Result;

/// An exclusive, advisory OS-level lock on a collection's directory.
///
/// Unlocked automatically on drop. Advisory locking only protects
/// cooperating processes (spec.md's "single-writer assumption enforced
/// by an on-disk lock" — not a mandatory-locking guarantee against an
/// uncooperative process).
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Acquire the lock for `name`'s directory `dir`, creating the
    /// `<name>.lock` file if absent. Fails immediately (does not block)
    /// if another handle already holds it.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.lock"));
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        file.try_lock_exclusive().map_err(|e| {
            Error::lock(path.display().to_string(), e.to_string())
        })?;
        Ok(DirectoryLock { file, path })
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_drop_allows_reacquisition() {
        let dir = tempdir().unwrap();
        {
            let _lock = DirectoryLock::acquire(dir.path(), "widgets").unwrap();
        }
        let _lock2 = DirectoryLock::acquire(dir.path(), "widgets").unwrap();
    }

    #[test]
    fn second_concurrent_acquire_fails() {
        let dir = tempdir().unwrap();
        let _lock = DirectoryLock::acquire(dir.path(), "widgets").unwrap();
        let err = DirectoryLock::acquire(dir.path(), "widgets").unwrap_err();
        assert!(matches!(err, Error::Lock { .. }));
    }

    #[test]
    fn lock_file_name_includes_collection_name() {
        let dir = tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path(), "widgets").unwrap();
        assert_eq!(lock.path().file_name().unwrap(), "widgets.lock");
    }
}
