//! Drives a staged [`Transaction`] to commit or rollback across every
//! collection it touches (spec.md §4.8, C8).
//!
//! The actual per-collection validate/apply step lives on `Collection`
//! (`validate_staged_ops`/`commit_prepared`/`compensate`, crate-private)
//! since it needs the collection's document map, indexes, and WAL. This
//! module owns the cross-collection sequencing: acquire every involved
//! collection's commit lock in a fixed order (via [`TransactionManager`]),
//! then also take and hold each collection's own write lock continuously
//! across validation and commit — the commit lock only serializes
//! concurrent *transactions*, while the write lock is the same one
//! `Collection::insert`/`update`/`remove` take, so holding it blocks a
//! racing single-document write from invalidating what was just
//! validated. If a collection's commit fails partway through, every
//! already-committed collection in this transaction is compensated
//! (durably rolled back) before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use wise_json_concurrency::{Transaction, TransactionManager, TxnState};
use wise_json_core::{Error, Result};

use crate::collection::Collection;

/// Commit `txn` against `collections` (a lookup from collection name
/// to its open handle, e.g. backed by [`crate::Database::collection`]).
///
/// Acquires commit locks for every collection `txn` touches (in
/// lexicographic order, via `txn_manager`) plus each collection's own
/// write lock, held continuously through validation and commit.
/// Validates every collection's staged ops against current state, and
/// only if every collection validates does it commit any of them. If a
/// later collection's commit fails, every collection already committed
/// in this pass is compensated back to its pre-transaction state before
/// the error is returned, so the transaction is atomic across
/// collections even though each collection's WAL append is a separate
/// durable action.
pub async fn commit_transaction(
    txn_manager: &TransactionManager,
    txn: &mut Transaction,
    collections: &HashMap<String, Arc<Collection>>,
) -> Result<()> {
    let involved = txn.involved_collections();
    for name in &involved {
        if !collections.contains_key(name) {
            return Err(Error::not_found(format!("collection '{name}'")));
        }
    }

    let _commit_locks = txn_manager.acquire_commit_locks(txn).await;

    let mut guards = Vec::with_capacity(involved.len());
    for name in &involved {
        guards.push(collections[name].lock_for_transaction()?);
    }

    // Validation pass: every collection must accept its ops, with its
    // write lock held, before any collection is allowed to commit.
    let mut prepared = Vec::with_capacity(involved.len());
    for (name, guard) in involved.iter().zip(guards.iter()) {
        let ops: Vec<_> = txn.ops_for(name).cloned().collect();
        prepared.push(collections[name].validate_staged_ops(guard, &ops)?);
    }

    // Commit pass, tracking a pre-commit snapshot of each collection so
    // a mid-loop failure can be compensated for.
    let mut committed = Vec::with_capacity(involved.len());
    let mut commit_err = None;
    for (i, p) in prepared.into_iter().enumerate() {
        let name = &involved[i];
        let collection = &collections[name];
        let guard = &mut guards[i];
        let snapshot = collection.snapshot(guard);
        match collection.commit_prepared(guard, txn.id(), p) {
            Ok((_, wal_count)) => committed.push((i, snapshot, wal_count)),
            Err(e) => {
                commit_err = Some(e);
                break;
            }
        }
    }

    if let Some(err) = commit_err {
        let rollback_id = format!("{}-rollback", txn.id());
        for (i, snapshot, _) in committed.into_iter().rev() {
            let name = &involved[i];
            let collection = &collections[name];
            let guard = &mut guards[i];
            if let Err(compensate_err) = collection.compensate(guard, &rollback_id, snapshot) {
                error!(
                    collection = %name,
                    txn = %txn.id(),
                    error = %compensate_err,
                    "failed to compensate a partially committed cross-collection transaction"
                );
            }
        }
        drop(guards);
        return Err(err);
    }

    drop(guards);
    for (i, _, wal_count) in &committed {
        collections[&involved[*i]].maybe_auto_checkpoint(*wal_count);
    }

    txn.mark_committed();
    Ok(())
}

/// Discard `txn`'s staged buffer without touching any collection.
pub fn rollback_transaction(txn: &mut Transaction) {
    txn.rollback();
    debug_assert_eq!(txn.state(), TxnState::RolledBack);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;
    use wise_json_concurrency::StagedOp;
    use wise_json_core::CollectionConfig;

    fn open(dir: &std::path::Path, name: &str) -> Arc<Collection> {
        Collection::open(name, dir.join(name), CollectionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn commit_applies_effects_across_collections() {
        let root = tempdir().unwrap();
        let col_a = open(root.path(), "a");
        let col_b = open(root.path(), "b");
        col_b.insert(json!({"_id": "y"}).as_object().unwrap().clone()).await.unwrap();

        let mut collections = HashMap::new();
        collections.insert("a".to_string(), col_a.clone());
        collections.insert("b".to_string(), col_b.clone());

        let txn_manager = TransactionManager::new();
        let mut txn = txn_manager.begin();
        txn.stage("a", StagedOp::Insert(json!({"_id": "x"})));
        txn.stage("b", StagedOp::Remove { id: "y".to_string() });

        commit_transaction(&txn_manager, &mut txn, &collections).await.unwrap();

        assert!(col_a.get_by_id("x").is_some());
        assert!(col_b.get_by_id("y").is_none());
    }

    /// S4 — a rolled-back transaction leaves every collection untouched.
    #[tokio::test]
    async fn rollback_leaves_collections_untouched() {
        let root = tempdir().unwrap();
        let col_a = open(root.path(), "a");
        let col_b = open(root.path(), "b");
        col_b.insert(json!({"_id": "y"}).as_object().unwrap().clone()).await.unwrap();

        let txn_manager = TransactionManager::new();
        let mut txn = txn_manager.begin();
        txn.stage("a", StagedOp::Insert(json!({"_id": "x"})));
        txn.stage("b", StagedOp::Remove { id: "y".to_string() });

        rollback_transaction(&mut txn);

        assert!(col_a.get_by_id("x").is_none());
        assert!(col_b.get_by_id("y").is_some());
    }
}
