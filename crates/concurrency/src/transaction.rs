//! Cross-collection transaction staging and commit-lock ordering
//! (spec.md §4.8, C8).
//!
//! This module owns the parts of the transaction protocol that do not
//! require looking inside a collection's document map: the staged
//! operation buffer, the transaction id/state machine, and acquiring
//! every involved collection's commit lock in a fixed (lexicographic)
//! order so two transactions touching overlapping collections can
//! never deadlock each other. Actually applying staged effects —
//! validating uniqueness, writing `TXN_BEGIN`/op/`TXN_COMMIT` to each
//! collection's WAL, updating in-memory state — is done by the engine
//! crate, which is the one thing with a live `Collection` to apply to.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One staged mutation within a transaction, targeting one collection.
#[derive(Debug, Clone)]
pub enum StagedOp {
    /// Stage an insert of `doc`.
    Insert(serde_json::Value),
    /// Stage a merge of `patch` into the document with id `id`.
    Update {
        /// Target document id.
        id: String,
        /// Fields to merge in.
        patch: serde_json::Value,
    },
    /// Stage removal of the document with id `id`.
    Remove {
        /// Target document id.
        id: String,
    },
}

/// A staged op together with the collection it targets.
#[derive(Debug, Clone)]
pub struct CollectionOp {
    /// Name of the target collection.
    pub collection: String,
    /// The operation staged against it.
    pub op: StagedOp,
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting staged operations.
    Open,
    /// Committed; its buffer has been applied and is now inert.
    Committed,
    /// Discarded; its buffer was never applied.
    RolledBack,
}

/// A staged batch of operations over one or more collections.
///
/// Operations are buffered, not applied, until `commit()` — callers
/// get a `Transaction` from `TransactionManager::begin`, stage work via
/// `stage`, then hand it to the engine's commit routine.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: String,
    ops: Vec<CollectionOp>,
    state: TxnState,
}

impl Transaction {
    fn new(id: String) -> Self {
        Transaction { id, ops: Vec::new(), state: TxnState::Open }
    }

    /// This transaction's id, shared across every collection's WAL
    /// `TXN_BEGIN`/`TXN_COMMIT` markers.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Buffer `op` against `collection`. Only valid while `Open`.
    pub fn stage(&mut self, collection: impl Into<String>, op: StagedOp) {
        debug_assert_eq!(self.state, TxnState::Open, "cannot stage into a closed transaction");
        self.ops.push(CollectionOp { collection: collection.into(), op });
    }

    /// Every staged operation, in staging order.
    pub fn ops(&self) -> &[CollectionOp] {
        &self.ops
    }

    /// Collection names touched by this transaction, sorted and
    /// deduplicated — the order in which commit locks must be
    /// acquired.
    pub fn involved_collections(&self) -> Vec<String> {
        self.ops.iter().map(|o| o.collection.clone()).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Every staged op targeting `collection`, in staging order.
    pub fn ops_for<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a StagedOp> + 'a {
        self.ops.iter().filter(move |o| o.collection == collection).map(|o| &o.op)
    }

    /// Mark this transaction committed. Called by the engine once
    /// every staged op has been durably applied.
    pub fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
    }

    /// Discard the buffer without applying anything.
    pub fn rollback(&mut self) {
        self.ops.clear();
        self.state = TxnState::RolledBack;
    }
}

/// Owns the per-collection commit locks used to serialize concurrent
/// transactions that share a collection.
#[derive(Debug, Default)]
pub struct TransactionManager {
    commit_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TransactionManager {
    /// A manager with no locks yet created.
    pub fn new() -> Self {
        TransactionManager::default()
    }

    /// Start a new, empty transaction with a fresh id.
    pub fn begin(&self) -> Transaction {
        Transaction::new(Uuid::new_v4().to_string())
    }

    fn lock_for(&self, collection: &str) -> Arc<Mutex<()>> {
        self.commit_locks.entry(collection.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire the commit lock for every collection `txn` touches, in
    /// lexicographic order by name, so two transactions racing over
    /// overlapping collection sets always request locks in the same
    /// order and cannot deadlock each other.
    ///
    /// Returned guards must be held for the duration of the commit and
    /// dropped together afterward.
    pub async fn acquire_commit_locks(&self, txn: &Transaction) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::new();
        for name in txn.involved_collections() {
            let lock = self.lock_for(&name);
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}
