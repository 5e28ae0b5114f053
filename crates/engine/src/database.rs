//! Database: the root directory and the collection cache (spec.md
//! §4.9, C9).

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use wise_json_concurrency::{Transaction, TransactionManager};
use wise_json_core::{DatabaseConfig, Error, Result};

use crate::collection::Collection;

const CHECKPOINTS_DIR_NAME: &str = "_checkpoints";

/// Root handle over every collection living under one directory.
///
/// `collection(name)` dedups concurrent first calls for the same name
/// by sharing one `OnceCell`-backed initialization future, so two
/// callers racing to open the same collection never run recovery
/// twice. A collection whose init sequence fails stays permanently
/// rejected with the recorded cause — it is never silently retried,
/// since a second attempt racing fresh writes against a half-recovered
/// collection is worse than a cached failure spec.md calls "fail fast".
pub struct Database {
    root: PathBuf,
    config: DatabaseConfig,
    collections: DashMap<String, Arc<OnceCell<std::result::Result<Arc<Collection>, String>>>>,
    transactions: TransactionManager,
}

impl Database {
    /// Open (creating if absent) the database directory at `root`.
    /// Collections are not recovered until first accessed.
    pub fn open(root: impl Into<PathBuf>, config: DatabaseConfig) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Database { root, config, collections: DashMap::new(), transactions: TransactionManager::new() })
    }

    /// Directory this database is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get (recovering and caching on first call) the collection named
    /// `name`. If recovery fails, the cause is cached permanently: every
    /// subsequent call for the same name returns the same error without
    /// retrying.
    pub async fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        let cell = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let config = self.config.default_collection_config.0.clone();
        let dir = self.root.join(name);
        let name_owned = name.to_string();
        let result = cell
            .get_or_init(|| async move { Collection::open(name_owned, dir, config).map_err(|e| e.to_string()) })
            .await;

        match result {
            Ok(collection) => Ok(collection.clone()),
            Err(cause) => Err(Error::init_failed(cause.clone())),
        }
    }

    /// Alias for [`Database::collection`], matching spec.md's naming.
    pub async fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collection(name).await
    }

    /// Begin a new, empty cross-collection transaction. Stage work onto
    /// it via `Transaction::stage`, then hand it to
    /// [`Database::commit_transaction`].
    pub fn begin_transaction(&self) -> Transaction {
        self.transactions.begin()
    }

    /// Commit `txn` across every collection it touches, resolving each
    /// by name through this database's own collection cache (spec.md
    /// §4.9's "transaction registry" responsibility).
    pub async fn commit_transaction(&self, txn: &mut Transaction) -> Result<()> {
        let mut resolved = HashMap::new();
        for name in txn.involved_collections() {
            let collection = self.collection(&name).await?;
            resolved.insert(name, collection);
        }
        crate::transaction_apply::commit_transaction(&self.transactions, txn, &resolved).await
    }

    /// Every collection name on disk: subdirectories of `root`,
    /// excluding hidden names and `_checkpoints`.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == CHECKPOINTS_DIR_NAME {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Close every cached collection. Safe to call more than once;
    /// closing order is unspecified.
    pub async fn close(&self) -> Result<()> {
        let cached: Vec<_> = self.collections.iter().map(|e| e.value().clone()).collect();
        for cell in cached {
            if let Some(Ok(collection)) = cell.get() {
                collection.close().await?;
            }
        }
        info!(root = %self.root.display(), "database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wise_json_concurrency::StagedOp;

    #[tokio::test]
    async fn collection_init_failure_is_cached_permanently() {
        let root = tempfile::tempdir().unwrap();
        let db = Database::open(root.path(), DatabaseConfig::default()).unwrap();

        // Block "widgets"'s directory with a plain file so Collection::open's
        // create_dir_all fails.
        std::fs::write(root.path().join("widgets"), b"not a directory").unwrap();

        let first = db.collection("widgets").await.unwrap_err();
        assert!(matches!(first, Error::InitFailed(_)));

        // Fixing the underlying problem doesn't help: the failure is
        // cached permanently, never retried.
        std::fs::remove_file(root.path().join("widgets")).unwrap();
        let second = db.collection("widgets").await.unwrap_err();
        assert!(matches!(second, Error::InitFailed(_)));
    }

    #[tokio::test]
    async fn begin_and_commit_transaction_through_database() {
        let root = tempfile::tempdir().unwrap();
        let db = Database::open(root.path(), DatabaseConfig::default()).unwrap();
        let a = db.collection("a").await.unwrap();
        let b = db.collection("b").await.unwrap();
        b.insert(serde_json::json!({"_id": "y"}).as_object().unwrap().clone()).await.unwrap();

        let mut txn = db.begin_transaction();
        txn.stage("a", StagedOp::Insert(serde_json::json!({"_id": "x"})));
        txn.stage("b", StagedOp::Remove { id: "y".to_string() });

        db.commit_transaction(&mut txn).await.unwrap();

        assert!(a.get_by_id("x").is_some());
        assert!(b.get_by_id("y").is_none());
    }
}
