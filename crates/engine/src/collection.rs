//! Collection core: in-memory state, CRUD surface, lifecycle, and the
//! recovery sequence (spec.md §4.7, C7).
//!
//! Every mutating call is submitted to a per-collection [`WriteQueue`]
//! so concurrent callers never interleave writes; reads run directly
//! against an `RwLock`-guarded snapshot of document state and may run
//! concurrently with each other (but never torn, since a write holds
//! the lock for its whole critical section).

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use wise_json_core::document::{now_iso8601, ID_FIELD};
use wise_json_core::{CollectionConfig, Document, Error, IndexDef, Result};
use wise_json_concurrency::{DirectoryLock, WriteQueue};
use wise_json_durability::{self as durability, WalEntry, WalWriter};
use wise_json_storage::{find_expired, Filter, IndexManager};

const CHECKPOINTS_DIR_NAME: &str = "_checkpoints";

/// Lifecycle state (spec.md §4.7): `ready` is the only state in which
/// operations are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Recovery has not started.
    Uninitialized,
    /// Recovery is in progress.
    Initializing,
    /// Accepting operations.
    Ready,
    /// `close()` has been called; draining.
    Closing,
    /// Fully closed; every further operation fails.
    Closed,
}

/// An event emitted after a mutation commits, for `on(event, listener)`
/// subscribers.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// A document was inserted.
    AfterInsert(Value),
    /// A document was updated; carries the new value.
    AfterUpdate(Value),
    /// A document id was removed.
    AfterRemove(String),
    /// The collection was cleared.
    AfterClear,
}

/// Snapshot counters returned by `stats()`.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    /// Live document count.
    pub document_count: usize,
    /// Number of secondary indexes defined.
    pub index_count: usize,
    /// WAL entries appended since the last successful checkpoint.
    pub wal_entries_since_checkpoint: u64,
    /// ISO-8601 timestamp of the last successful checkpoint, if any.
    pub last_checkpoint_at: Option<String>,
}

/// The outcome of an `upsert`.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// No match was found; a new document was inserted.
    Inserted(Value),
    /// An existing document was found and updated.
    Updated(Value),
}

/// Result of an `updateOne`/`updateMany` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateSummary {
    /// Documents matching the filter.
    pub matched_count: usize,
    /// Documents actually changed by applying the operators.
    pub modified_count: usize,
}

pub(crate) struct CollectionData {
    docs: HashMap<String, Value>,
    order: Vec<String>,
    indexes: IndexManager,
}

/// A staged-and-validated set of effects for one collection, ready to
/// be committed via [`Collection::commit_prepared`]. Produced by
/// [`Collection::validate_staged_ops`].
pub(crate) struct PreparedTxn {
    proposed_docs: HashMap<String, Value>,
    proposed_indexes: IndexManager,
    new_order: Vec<String>,
    wal_entries: Vec<WalEntry>,
    results: Vec<Option<Value>>,
}

/// A point-in-time copy of a collection's state, taken immediately
/// before committing a cross-collection transaction's effects against
/// it, so [`Collection::compensate`] can restore it if a later
/// collection in the same transaction fails to commit.
pub(crate) struct CollectionSnapshot {
    docs: HashMap<String, Value>,
    order: Vec<String>,
    indexes: IndexManager,
}

impl CollectionData {
    fn live_in_order(&self) -> impl Iterator<Item = &Value> {
        self.order.iter().filter_map(move |id| self.docs.get(id))
    }
}

/// A named, durable document collection.
pub struct Collection {
    name: String,
    dir: PathBuf,
    checkpoints_dir: PathBuf,
    wal_path: PathBuf,
    config: CollectionConfig,
    state: parking_lot::RwLock<LifecycleState>,
    data: parking_lot::RwLock<CollectionData>,
    wal: parking_lot::Mutex<WalWriter>,
    lock: parking_lot::Mutex<Option<DirectoryLock>>,
    queue: WriteQueue,
    events: broadcast::Sender<CollectionEvent>,
    last_checkpoint_at: parking_lot::Mutex<Option<String>>,
}

impl Collection {
    /// Open `name` rooted at `dir`, running the full recovery sequence:
    /// load the latest checkpoint, replay the WAL tail, rebuild
    /// indexes, and perform an initial TTL sweep.
    pub fn open(name: impl Into<String>, dir: impl Into<PathBuf>, config: CollectionConfig) -> Result<Arc<Collection>> {
        let name = name.into();
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let checkpoints_dir = dir.join(CHECKPOINTS_DIR_NAME);
        let wal_path = dir.join(format!("{name}.wal"));

        let checkpoint = durability::load_latest_checkpoint(&checkpoints_dir, &name)
            .map_err(|e| Error::corrupted(e.to_string()))?;
        let (mut docs, mut order, mut index_defs, last_checkpoint_at) = match checkpoint {
            Some(loaded) => {
                let mut docs = HashMap::new();
                let mut order = Vec::new();
                for doc in loaded.documents {
                    if let Some(id) = doc.get(ID_FIELD).and_then(Value::as_str) {
                        order.push(id.to_string());
                        docs.insert(id.to_string(), doc);
                    }
                }
                (docs, order, loaded.indexes, None)
            }
            None => (HashMap::new(), Vec::new(), Vec::new(), None),
        };

        let wal_entries = durability::read_wal(&wal_path, config.wal_read_options)
            .map_err(|e| Error::corrupted(e.to_string()))?;
        replay_entries(wal_entries, &mut docs, &mut order, &mut index_defs);

        let now = Utc::now().timestamp_millis();
        for expired_id in find_expired(docs.iter(), now) {
            docs.remove(&expired_id);
            order.retain(|id| id != &expired_id);
        }

        let indexes = IndexManager::rebuild(&index_defs, docs.iter()).map_err(|e| Error::unique_constraint(e.field, e.value))?;

        let wal = WalWriter::open(&wal_path, config.wal_force_sync).map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let (events, _rx) = broadcast::channel(256);

        info!(collection = %name, documents = docs.len(), "collection recovered");

        let checkpoint_interval_ms = config.checkpoint_interval_ms;
        let ttl_cleanup_interval_ms = config.ttl_cleanup_interval_ms;
        let collection = Arc::new(Collection {
            name,
            dir,
            checkpoints_dir,
            wal_path,
            config,
            state: parking_lot::RwLock::new(LifecycleState::Ready),
            data: parking_lot::RwLock::new(CollectionData { docs, order, indexes }),
            wal: parking_lot::Mutex::new(wal),
            lock: parking_lot::Mutex::new(None),
            queue: WriteQueue::spawn(),
            events,
            last_checkpoint_at: parking_lot::Mutex::new(last_checkpoint_at),
        });

        if checkpoint_interval_ms > 0 {
            collection.spawn_checkpoint_timer(checkpoint_interval_ms);
        }
        if ttl_cleanup_interval_ms > 0 {
            collection.spawn_ttl_timer(ttl_cleanup_interval_ms);
        }

        Ok(collection)
    }

    /// Spawn a background task that checkpoints every
    /// `checkpointIntervalMs` (spec.md §4.7's checkpoint policy, timer
    /// branch). Holds only a weak reference so it exits quietly once
    /// every strong handle to the collection is dropped.
    fn spawn_checkpoint_timer(self: &Arc<Self>, interval_ms: u64) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let Some(collection) = weak.upgrade() else { break };
                if !collection.is_ready() {
                    break;
                }
                if let Err(e) = collection.checkpoint_and_truncate() {
                    warn!(collection = %collection.name, error = %e, "timer-triggered checkpoint failed");
                }
            }
        });
    }

    /// Spawn a background task that sweeps expired documents every
    /// `ttlCleanupIntervalMs` (spec.md §4.5's sweeper, timer branch),
    /// in addition to the opportunistic sweeps already run before
    /// reads. Mirrors `spawn_checkpoint_timer`'s weak-reference
    /// lifetime: exits quietly once every strong handle is dropped.
    fn spawn_ttl_timer(self: &Arc<Self>, interval_ms: u64) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let Some(collection) = weak.upgrade() else { break };
                if !collection.is_ready() {
                    break;
                }
                collection.sweep_expired();
            }
        });
    }

    fn is_ready(&self) -> bool {
        *self.state.read() == LifecycleState::Ready
    }

    /// This collection's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to this collection's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.state.read() {
            LifecycleState::Ready => Ok(()),
            _ => Err(Error::closed(format!("collection '{}'", self.name))),
        }
    }

    fn ensure_locked(&self) -> Result<()> {
        let mut guard = self.lock.lock();
        if guard.is_none() {
            *guard = Some(DirectoryLock::acquire(&self.dir, &self.name)?);
        }
        Ok(())
    }

    fn emit(&self, event: CollectionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn maybe_auto_checkpoint(&self, wal_entries_since_truncate: u64) {
        let should = self.config.max_wal_entries_before_checkpoint > 0
            && wal_entries_since_truncate >= self.config.max_wal_entries_before_checkpoint;
        if should {
            if let Err(e) = self.checkpoint_and_truncate() {
                warn!(collection = %self.name, error = %e, "automatic checkpoint failed");
            }
        }
    }

    fn checkpoint_and_truncate(&self) -> Result<()> {
        let data = self.data.read();
        let docs: Vec<Value> = data.order.iter().filter_map(|id| data.docs.get(id).cloned()).collect();
        let index_defs = data.indexes.definitions();
        drop(data);

        let now = now_iso8601();
        let info = durability::write_checkpoint(
            &self.checkpoints_dir,
            &self.name,
            &docs,
            &index_defs,
            self.config.max_segment_size_bytes,
            self.config.json_indent,
            &now,
        )
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        durability::prune_old_checkpoints(&self.checkpoints_dir, &self.name, self.config.checkpoints_to_keep)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        self.wal.lock().truncate().map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        *self.last_checkpoint_at.lock() = Some(now);
        debug!(collection = %self.name, documents = info.document_count, "checkpoint + WAL truncate complete");
        Ok(())
    }

    /// Acquire this collection's write lock for the duration of a
    /// cross-collection transaction's validate-then-commit sequence
    /// (spec.md §4.8). Held continuously across both phases so a
    /// concurrent single-document write (which also takes `data.write()`
    /// via `do_insert`/`do_update`/`do_remove`) cannot interleave and
    /// invalidate what was just validated.
    pub(crate) fn lock_for_transaction(&self) -> Result<parking_lot::RwLockWriteGuard<'_, CollectionData>> {
        self.ensure_locked()?;
        Ok(self.data.write())
    }

    /// Take a restore point for `data`, to be handed back to
    /// [`Collection::compensate`] if a later collection in the same
    /// transaction fails to commit.
    pub(crate) fn snapshot(&self, data: &CollectionData) -> CollectionSnapshot {
        CollectionSnapshot { docs: data.docs.clone(), order: data.order.clone(), indexes: data.indexes.clone() }
    }

    /// Validate every op in `ops` against `data`'s current state,
    /// without mutating it. Pure: safe to call while only holding the
    /// write guard for validation purposes, before any collection in
    /// the transaction has committed.
    pub(crate) fn validate_staged_ops(&self, data: &CollectionData, ops: &[wise_json_concurrency::StagedOp]) -> Result<PreparedTxn> {
        use wise_json_concurrency::StagedOp;

        let mut proposed_docs = data.docs.clone();
        let mut proposed_indexes = data.indexes.clone();
        let mut new_order = data.order.clone();
        let mut wal_entries = Vec::new();
        let mut results = Vec::new();

        for op in ops {
            match op {
                StagedOp::Insert(doc) => {
                    let id = doc
                        .get(ID_FIELD)
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::validation("staged insert is missing _id"))?
                        .to_string();
                    proposed_indexes.check_insert(&id, doc).map_err(|e| Error::unique_constraint(e.field, e.value))?;
                    proposed_indexes.on_insert(&id, doc).expect("checked above");
                    if !proposed_docs.contains_key(&id) {
                        new_order.push(id.clone());
                    }
                    proposed_docs.insert(id, doc.clone());
                    wal_entries.push(WalEntry::INSERT { doc: doc.clone() });
                    results.push(Some(doc.clone()));
                }
                StagedOp::Update { id, patch } => {
                    let Some(old) = proposed_docs.get(id).cloned() else {
                        results.push(None);
                        continue;
                    };
                    let patch_obj = patch.as_object().ok_or_else(|| Error::validation("staged update patch must be an object"))?;
                    let mut doc = Document::from_map(old.as_object().expect("stored documents are objects").clone());
                    doc.apply_patch(patch_obj, &now_iso8601());
                    let new_value = doc.to_value();
                    proposed_indexes.on_update(id, &old, &new_value).map_err(|e| Error::unique_constraint(e.field, e.value))?;
                    proposed_docs.insert(id.clone(), new_value.clone());
                    wal_entries.push(WalEntry::UPDATE { id: id.clone(), patch: patch.clone() });
                    results.push(Some(new_value));
                }
                StagedOp::Remove { id } => {
                    if let Some(old) = proposed_docs.remove(id) {
                        proposed_indexes.on_remove(id, &old);
                        new_order.retain(|existing| existing != id);
                        wal_entries.push(WalEntry::REMOVE { id: id.clone() });
                    }
                    results.push(None);
                }
            }
        }

        Ok(PreparedTxn { proposed_docs, proposed_indexes, new_order, wal_entries, results })
    }

    /// Commit `prepared` against `data`: bracket its WAL entries with
    /// `TXN_BEGIN`/`TXN_COMMIT`, then apply the in-memory effects.
    /// Returns the per-op results plus the WAL entry count since the
    /// last truncate, so the caller can trigger `maybe_auto_checkpoint`
    /// itself once every collection's write guard has been released
    /// (checkpointing takes a read lock on the same `data`, so it must
    /// never run while this guard is still held).
    pub(crate) fn commit_prepared(&self, data: &mut CollectionData, txn_id: &str, prepared: PreparedTxn) -> Result<(Vec<Option<Value>>, u64)> {
        let mut wal = self.wal.lock();
        wal.append(&WalEntry::TXN_BEGIN { txn_id: txn_id.to_string() })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        for entry in &prepared.wal_entries {
            wal.append(entry).map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        }
        wal.append(&WalEntry::TXN_COMMIT { txn_id: txn_id.to_string() })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let wal_count = wal.entries_since_truncate();
        drop(wal);

        data.docs = prepared.proposed_docs;
        data.order = prepared.new_order;
        data.indexes = prepared.proposed_indexes;

        Ok((prepared.results, wal_count))
    }

    /// Durably undo a transaction already committed against this
    /// collection, restoring it to `before`. Writes a compensating
    /// `TXN_BEGIN`/`CLEAR`/`INSERT`.../`TXN_COMMIT` sequence to the WAL
    /// (an ARIES-style compensation log record, since the entries
    /// already appended for the original commit cannot be un-appended)
    /// and restores `data` to match. Used when a later collection in
    /// the same cross-collection transaction fails to commit after
    /// this one already succeeded.
    pub(crate) fn compensate(&self, data: &mut CollectionData, txn_id: &str, before: CollectionSnapshot) -> Result<()> {
        let mut wal = self.wal.lock();
        wal.append(&WalEntry::TXN_BEGIN { txn_id: txn_id.to_string() })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        wal.append(&WalEntry::CLEAR).map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        for id in &before.order {
            if let Some(doc) = before.docs.get(id) {
                wal.append(&WalEntry::INSERT { doc: doc.clone() })
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            }
        }
        wal.append(&WalEntry::TXN_COMMIT { txn_id: txn_id.to_string() })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        drop(wal);

        data.docs = before.docs;
        data.order = before.order;
        data.indexes = before.indexes;
        Ok(())
    }

    // --- mutating operations, each submitted through the write queue ---

    /// Insert a new document, assigning `_id`/`createdAt`/`updatedAt`.
    pub async fn insert(self: &Arc<Self>, fields: Map<String, Value>) -> Result<Value> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_insert(fields))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_insert(self: Arc<Self>, fields: Map<String, Value>) -> Result<Value> {
        self.ensure_locked()?;
        let now = now_iso8601();
        let doc = Document::new_inserted(fields, &*self.config.id_generator, &now);
        let value = doc.to_value();
        let id = doc.id().expect("new_inserted always assigns an id").to_string();

        let mut data = self.data.write();
        data.indexes.check_insert(&id, &value).map_err(|e| Error::unique_constraint(e.field, e.value))?;
        let entries = self.wal.lock().append(&WalEntry::INSERT { doc: value.clone() });
        entries.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        data.indexes.on_insert(&id, &value).expect("checked above");
        data.docs.insert(id.clone(), value.clone());
        data.order.push(id);
        let wal_count = self.wal.lock().entries_since_truncate();
        drop(data);

        self.emit(CollectionEvent::AfterInsert(value.clone()));
        self.maybe_auto_checkpoint(wal_count);
        Ok(value)
    }

    /// Insert every document in `batch`, all-or-nothing against unique
    /// constraints: the whole batch is validated against current
    /// indexes plus itself before anything is applied.
    pub async fn insert_many(self: &Arc<Self>, batch: Vec<Map<String, Value>>) -> Result<Vec<Value>> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_insert_many(batch))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_insert_many(self: Arc<Self>, batch: Vec<Map<String, Value>>) -> Result<Vec<Value>> {
        self.ensure_locked()?;
        let now = now_iso8601();
        let mut prepared = Vec::with_capacity(batch.len());
        for fields in batch {
            let doc = Document::new_inserted(fields, &*self.config.id_generator, &now);
            prepared.push(doc.to_value());
        }

        let mut data = self.data.write();
        // Validate the whole batch against current state + itself before
        // applying anything (spec.md's all-or-nothing contract).
        let mut scratch = data.indexes.clone();
        for value in &prepared {
            let id = value.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default();
            scratch.on_insert(id, value).map_err(|e| Error::unique_constraint(e.field, e.value))?;
        }

        let mut wal = self.wal.lock();
        for value in &prepared {
            wal.append(&WalEntry::INSERT { doc: value.clone() })
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        }
        let wal_count = wal.entries_since_truncate();
        drop(wal);

        data.indexes = scratch;
        for value in &prepared {
            let id = value.get(ID_FIELD).and_then(Value::as_str).unwrap().to_string();
            data.docs.insert(id.clone(), value.clone());
            data.order.push(id);
        }
        drop(data);

        for value in &prepared {
            self.emit(CollectionEvent::AfterInsert(value.clone()));
        }
        self.maybe_auto_checkpoint(wal_count);
        Ok(prepared)
    }

    /// Merge `patch` into the document with id `id`. Returns `None` if
    /// absent.
    pub async fn update(self: &Arc<Self>, id: impl Into<String>, patch: Map<String, Value>) -> Result<Option<Value>> {
        self.ensure_ready()?;
        let this = self.clone();
        let id = id.into();
        self.queue
            .submit(move || this.do_update(id, patch))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_update(self: Arc<Self>, id: String, patch: Map<String, Value>) -> Result<Option<Value>> {
        self.ensure_locked()?;
        let mut data = self.data.write();
        let Some(old) = data.docs.get(&id).cloned() else { return Ok(None) };

        let mut doc = Document::from_map(old.as_object().expect("stored documents are objects").clone());
        doc.apply_patch(&patch, &now_iso8601());
        let new_value = doc.to_value();

        data.indexes.on_update(&id, &old, &new_value).map_err(|e| Error::unique_constraint(e.field, e.value))?;
        self.wal
            .lock()
            .append(&WalEntry::UPDATE { id: id.clone(), patch: Value::Object(patch) })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        data.docs.insert(id, new_value.clone());
        let wal_count = self.wal.lock().entries_since_truncate();
        drop(data);

        self.emit(CollectionEvent::AfterUpdate(new_value.clone()));
        self.maybe_auto_checkpoint(wal_count);
        Ok(Some(new_value))
    }

    /// Evaluate `filter`, apply `{$set, $inc}` operators to the first
    /// match (`update_one`) or every match (`update_many`).
    pub async fn update_one(self: &Arc<Self>, filter: Value, ops: Value) -> Result<UpdateSummary> {
        self.update_filtered(filter, ops, false).await
    }

    /// See [`Collection::update_one`]; applies to every match.
    pub async fn update_many(self: &Arc<Self>, filter: Value, ops: Value) -> Result<UpdateSummary> {
        self.update_filtered(filter, ops, true).await
    }

    async fn update_filtered(self: &Arc<Self>, filter: Value, ops: Value, all: bool) -> Result<UpdateSummary> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_update_filtered(filter, ops, all))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_update_filtered(self: Arc<Self>, filter: Value, ops: Value, all: bool) -> Result<UpdateSummary> {
        let parsed = Filter::parse(&filter).map_err(|e| Error::validation(e.to_string()))?;
        let ids_to_touch: Vec<String> = {
            let data = self.data.read();
            data.order
                .iter()
                .filter(|id| data.docs.get(*id).map(|d| parsed.matches(d)).unwrap_or(false))
                .cloned()
                .collect()
        };

        let mut summary = UpdateSummary::default();
        for id in ids_to_touch {
            summary.matched_count += 1;
            let patch = apply_field_operators(&self.data.read().docs[&id], &ops)?;
            if patch.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
                if self.clone().do_update(id, patch.as_object().unwrap().clone())?.is_some() {
                    summary.modified_count += 1;
                }
            }
            if !all {
                break;
            }
        }
        Ok(summary)
    }

    /// Remove the document with id `id`. Returns `true` if it existed.
    pub async fn remove(self: &Arc<Self>, id: impl Into<String>) -> Result<bool> {
        self.ensure_ready()?;
        let this = self.clone();
        let id = id.into();
        self.queue
            .submit(move || this.do_remove(id))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_remove(self: Arc<Self>, id: String) -> Result<bool> {
        self.ensure_locked()?;
        let mut data = self.data.write();
        let Some(old) = data.docs.remove(&id) else { return Ok(false) };
        data.order.retain(|existing| existing != &id);
        data.indexes.on_remove(&id, &old);
        self.wal
            .lock()
            .append(&WalEntry::REMOVE { id: id.clone() })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let wal_count = self.wal.lock().entries_since_truncate();
        drop(data);

        self.emit(CollectionEvent::AfterRemove(id));
        self.maybe_auto_checkpoint(wal_count);
        Ok(true)
    }

    /// Remove every document matching `predicate`. Returns the count
    /// removed. Same predicate-based deletion as [`Collection::delete_many`]
    /// under a different name — spec.md lists `removeMany`/`deleteMany`
    /// as two distinct named operations alongside `remove`/`deleteOne`.
    pub async fn remove_many(self: &Arc<Self>, predicate: Value) -> Result<usize> {
        self.delete_many(predicate).await
    }

    /// Remove every document matching `filter`. Returns the count
    /// removed.
    pub async fn delete_many(self: &Arc<Self>, filter: Value) -> Result<usize> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_delete_filtered(filter, true))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    /// Remove the first document matching `filter`. Returns `true` if
    /// one was removed.
    pub async fn delete_one(self: &Arc<Self>, filter: Value) -> Result<bool> {
        let removed = {
            self.ensure_ready()?;
            let this = self.clone();
            self.queue
                .submit(move || this.do_delete_filtered(filter, false))
                .await
                .map_err(|_| Error::closed("collection"))?
        }?;
        Ok(removed > 0)
    }

    fn do_delete_filtered(self: Arc<Self>, filter: Value, all: bool) -> Result<usize> {
        let parsed = Filter::parse(&filter).map_err(|e| Error::validation(e.to_string()))?;
        let ids: Vec<String> = {
            let data = self.data.read();
            data.order
                .iter()
                .filter(|id| data.docs.get(*id).map(|d| parsed.matches(d)).unwrap_or(false))
                .cloned()
                .collect()
        };
        let mut count = 0;
        for id in ids {
            if self.clone().do_remove(id)? {
                count += 1;
            }
            if !all {
                break;
            }
        }
        Ok(count)
    }

    /// Find the first document matching `query` and update it, or
    /// insert `setOnInsert ∪ queryFields ∪ data` (later keys win) if
    /// none exists.
    pub async fn upsert(self: &Arc<Self>, query: Value, data_fields: Map<String, Value>, set_on_insert: Map<String, Value>) -> Result<UpsertOutcome> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_upsert(query, data_fields, set_on_insert))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_upsert(self: Arc<Self>, query: Value, data_fields: Map<String, Value>, set_on_insert: Map<String, Value>) -> Result<UpsertOutcome> {
        let parsed = Filter::parse(&query).map_err(|e| Error::validation(e.to_string()))?;
        let existing_id = {
            let data = self.data.read();
            data.order.iter().find(|id| data.docs.get(*id).map(|d| parsed.matches(d)).unwrap_or(false)).cloned()
        };

        if let Some(id) = existing_id {
            let updated = self.clone().do_update(id, data_fields)?;
            return Ok(UpsertOutcome::Updated(updated.expect("id came from a live lookup")));
        }

        let mut fields = set_on_insert;
        if let Some(query_obj) = query.as_object() {
            for (k, v) in query_obj {
                if !k.starts_with('$') {
                    fields.insert(k.clone(), v.clone());
                }
            }
        }
        for (k, v) in data_fields {
            fields.insert(k, v);
        }
        let inserted = self.do_insert(fields)?;
        Ok(UpsertOutcome::Inserted(inserted))
    }

    /// Find the first document matching `filter`, apply `{$set,$inc}`
    /// operators, and return the resulting (or, if `return_original`,
    /// prior) document.
    pub async fn find_one_and_update(self: &Arc<Self>, filter: Value, ops: Value, return_original: bool) -> Result<Option<Value>> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_find_one_and_update(filter, ops, return_original))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_find_one_and_update(self: Arc<Self>, filter: Value, ops: Value, return_original: bool) -> Result<Option<Value>> {
        let parsed = Filter::parse(&filter).map_err(|e| Error::validation(e.to_string()))?;
        let matched = {
            let data = self.data.read();
            data.order
                .iter()
                .filter_map(|id| data.docs.get(id).map(|d| (id.clone(), d.clone())))
                .find(|(_, d)| parsed.matches(d))
        };
        let Some((id, original)) = matched else { return Ok(None) };
        let patch = apply_field_operators(&original, &ops)?;
        let patch_obj = patch.as_object().cloned().unwrap_or_default();
        let updated = self.do_update(id, patch_obj)?;
        if return_original {
            Ok(Some(original))
        } else {
            Ok(updated)
        }
    }

    /// Empty the collection, preserving index definitions.
    pub async fn clear(self: &Arc<Self>) -> Result<()> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.do_clear())
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_clear(self: Arc<Self>) -> Result<()> {
        self.ensure_locked()?;
        self.wal
            .lock()
            .append(&WalEntry::CLEAR)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        let mut data = self.data.write();
        data.docs.clear();
        data.order.clear();
        data.indexes.clear();
        drop(data);
        self.emit(CollectionEvent::AfterClear);
        Ok(())
    }

    /// Define a new index on `field`.
    pub async fn create_index(self: &Arc<Self>, field: impl Into<String>, unique: bool) -> Result<()> {
        self.ensure_ready()?;
        let this = self.clone();
        let field = field.into();
        self.queue
            .submit(move || this.do_create_index(field, unique))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_create_index(self: Arc<Self>, field: String, unique: bool) -> Result<()> {
        self.ensure_locked()?;
        let mut data = self.data.write();
        let docs_snapshot: Vec<(String, Value)> = data.order.iter().filter_map(|id| data.docs.get(id).map(|d| (id.clone(), d.clone()))).collect();
        let iter = docs_snapshot.iter().map(|(id, doc)| (id, doc));
        data.indexes
            .create_index(&field, unique, iter)
            .map_err(|e| Error::unique_constraint(e.field, e.value))?;
        self.wal
            .lock()
            .append(&WalEntry::INDEX_CREATE { field, unique })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(())
    }

    /// Drop the index on `field`, if any.
    pub async fn drop_index(self: &Arc<Self>, field: impl Into<String>) -> Result<()> {
        self.ensure_ready()?;
        let this = self.clone();
        let field = field.into();
        self.queue
            .submit(move || this.do_drop_index(field))
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    fn do_drop_index(self: Arc<Self>, field: String) -> Result<()> {
        self.ensure_locked()?;
        self.data.write().indexes.drop_index(&field);
        self.wal
            .lock()
            .append(&WalEntry::INDEX_DROP { field })
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(())
    }

    /// Currently defined index definitions.
    pub fn get_indexes(&self) -> Vec<IndexDef> {
        self.sweep_expired();
        self.data.read().indexes.definitions()
    }

    // --- read operations: not queued, run directly against the
    // RwLock-guarded state; each opportunistically sweeps expired
    // documents first so reads never observe dead entries. ---

    fn sweep_expired(&self) {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = {
            let data = self.data.read();
            find_expired(data.order.iter().filter_map(|id| data.docs.get(id).map(|d| (id, d))), now)
        };
        if expired.is_empty() {
            return;
        }
        let mut data = self.data.write();
        for id in expired {
            if let Some(doc) = data.docs.remove(&id) {
                data.indexes.on_remove(&id, &doc);
            }
            data.order.retain(|existing| existing != &id);
        }
    }

    /// Every document whose `_id` is `id`, live right now.
    pub fn get_by_id(&self, id: &str) -> Option<Value> {
        self.sweep_expired();
        self.data.read().docs.get(id).cloned()
    }

    /// Which TTL field (if any) governs `id`'s liveness, and whether it
    /// currently marks the document expired. Returns `None` if `id`
    /// isn't present (note: a document already swept for expiry also
    /// reads as absent, not as an expired `TtlState`).
    pub fn ttl_state(&self, id: &str) -> Option<wise_json_storage::TtlState> {
        self.sweep_expired();
        let doc = self.data.read().docs.get(id).cloned()?;
        Some(wise_json_storage::ttl_state(&doc, Utc::now().timestamp_millis()))
    }

    /// Every live document matching `filter`, optionally reshaped by
    /// `projection` (an object of `1`/`true` to include or `0`/`false`
    /// to exclude fields; mixing inclusion and exclusion is rejected
    /// except that `_id` may be excluded alongside inclusions).
    pub fn find(&self, filter: &Value, projection: Option<&Value>) -> Result<Vec<Value>> {
        self.sweep_expired();
        let parsed = Filter::parse(filter).map_err(|e| Error::validation(e.to_string()))?;
        let matched: Vec<Value> = {
            let data = self.data.read();
            if let Some((field, value)) = parsed.as_single_equality() {
                if let Some(ids) = data.indexes.find_ids(field, value) {
                    ids.iter().filter_map(|id| data.docs.get(id).cloned()).collect()
                } else {
                    data.live_in_order().filter(|d| parsed.matches(*d)).cloned().collect()
                }
            } else {
                data.live_in_order().filter(|d| parsed.matches(*d)).cloned().collect()
            }
        };
        match projection {
            Some(p) => matched.iter().map(|d| apply_projection(d, p)).collect(),
            None => Ok(matched),
        }
    }

    /// The first live document matching `filter`, see [`Collection::find`]
    /// for `projection`'s shape.
    pub fn find_one(&self, filter: &Value, projection: Option<&Value>) -> Result<Option<Value>> {
        Ok(self.find(filter, projection)?.into_iter().next())
    }

    /// Ids for an exact value on an indexed `field` (direct index
    /// lookup, bypassing the filter interpreter).
    pub fn find_by_indexed_value(&self, field: &str, value: &Value) -> Vec<Value> {
        self.sweep_expired();
        let data = self.data.read();
        data.indexes
            .find_ids(field, value)
            .map(|ids| ids.iter().filter_map(|id| data.docs.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// First document for an exact value on an indexed `field`.
    pub fn find_one_by_indexed_value(&self, field: &str, value: &Value) -> Option<Value> {
        self.find_by_indexed_value(field, value).into_iter().next()
    }

    /// Count of live documents, optionally restricted by `filter`.
    pub fn count(&self, filter: Option<&Value>) -> Result<usize> {
        match filter {
            Some(f) => Ok(self.find(f, None)?.len()),
            None => {
                self.sweep_expired();
                Ok(self.data.read().docs.len())
            }
        }
    }

    /// Every live document, in insertion order.
    pub fn get_all(&self) -> Vec<Value> {
        self.sweep_expired();
        self.data.read().live_in_order().cloned().collect()
    }

    /// Force a checkpoint and WAL truncation now.
    pub async fn flush_to_disk(self: &Arc<Self>) -> Result<()> {
        self.ensure_ready()?;
        let this = self.clone();
        self.queue
            .submit(move || this.checkpoint_and_truncate())
            .await
            .map_err(|_| Error::closed("collection"))?
    }

    /// Replace the live document set from a JSON array at `path`.
    /// `append` adds to the current state; `replace` clears first.
    pub async fn import_json(self: &Arc<Self>, path: &Path, append: bool) -> Result<usize> {
        let raw = std::fs::read(path)?;
        let docs: Vec<Map<String, Value>> = serde_json::from_slice(&raw)?;
        if !append {
            self.clear().await?;
        }
        let imported = self.insert_many(docs).await?;
        Ok(imported.len())
    }

    /// Write every live document to `path` as a JSON array.
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let docs = self.get_all();
        let bytes = serde_json::to_vec_pretty(&docs)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Snapshot counters for observability.
    pub fn stats(&self) -> CollectionStats {
        self.sweep_expired();
        let data = self.data.read();
        CollectionStats {
            document_count: data.docs.len(),
            index_count: data.indexes.definitions().len(),
            wal_entries_since_checkpoint: self.wal.lock().entries_since_truncate(),
            last_checkpoint_at: self.last_checkpoint_at.lock().clone(),
        }
    }

    /// Checkpoint, then mark this collection closed. Idempotent.
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == LifecycleState::Closed || *state == LifecycleState::Closing {
                return Ok(());
            }
            *state = LifecycleState::Closing;
        }
        let this = self.clone();
        let result = self
            .queue
            .submit(move || this.checkpoint_and_truncate())
            .await
            .map_err(|_| Error::closed("collection"))?;
        *self.state.write() = LifecycleState::Closed;
        result
    }
}


/// Apply `{$set, $inc}` operators to `doc`, returning a patch object
/// ready for `apply_patch`. `$set` fields are copied as-is; `$inc`
/// fields add a numeric delta to the current value (treated as 0 if
/// absent or non-numeric).
fn apply_field_operators(doc: &Value, ops: &Value) -> Result<Value> {
    let ops_obj = ops.as_object().ok_or_else(|| Error::validation("update operators must be an object"))?;
    let mut patch = Map::new();

    if let Some(set) = ops_obj.get("$set").and_then(Value::as_object) {
        for (k, v) in set {
            patch.insert(k.clone(), v.clone());
        }
    }
    if let Some(inc) = ops_obj.get("$inc").and_then(Value::as_object) {
        for (k, delta) in inc {
            let delta = delta.as_f64().ok_or_else(|| Error::validation(format!("$inc delta for '{k}' must be numeric")))?;
            let current = doc.get(k).and_then(Value::as_f64).unwrap_or(0.0);
            let new_value = current + delta;
            let as_json = if new_value.fract() == 0.0 && new_value.abs() < i64::MAX as f64 {
                Value::from(new_value as i64)
            } else {
                serde_json::Number::from_f64(new_value).map(Value::Number).unwrap_or(Value::Null)
            };
            patch.insert(k.clone(), as_json);
        }
    }
    Ok(Value::Object(patch))
}

/// Reshape `doc` per `projection`'s field-inclusion/exclusion spec
/// (spec.md §4.7/§4.10: values are `1`/`true` to include or `0`/`false`
/// to exclude; mixing is disallowed except that `_id` may be excluded
/// alongside inclusions).
fn apply_projection(doc: &Value, projection: &Value) -> Result<Value> {
    let spec = projection.as_object().ok_or_else(|| Error::validation("projection must be an object"))?;
    let doc_obj = doc.as_object().cloned().unwrap_or_default();

    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    for (field, v) in spec {
        let truthy = match v {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(true),
            _ => return Err(Error::validation(format!("projection value for '{field}' must be 0, 1, true, or false"))),
        };
        if truthy {
            includes.push(field.as_str());
        } else {
            excludes.push(field.as_str());
        }
    }

    let non_id_includes = includes.iter().any(|f| *f != ID_FIELD);
    let non_id_excludes = excludes.iter().any(|f| *f != ID_FIELD);
    if non_id_includes && non_id_excludes {
        return Err(Error::validation("projection cannot mix inclusion and exclusion for non-_id fields"));
    }

    if non_id_includes {
        let mut result = Map::new();
        for field in includes.iter().filter(|f| **f != ID_FIELD) {
            if let Some(v) = doc_obj.get(*field) {
                result.insert((*field).to_string(), v.clone());
            }
        }
        if !excludes.contains(&ID_FIELD) {
            if let Some(id) = doc_obj.get(ID_FIELD) {
                result.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        Ok(Value::Object(result))
    } else {
        let mut result = doc_obj;
        for field in excludes {
            result.remove(field);
        }
        Ok(Value::Object(result))
    }
}

fn replay_entries(entries: Vec<WalEntry>, docs: &mut HashMap<String, Value>, order: &mut Vec<String>, index_defs: &mut Vec<IndexDef>) {
    let mut i = 0;
    while i < entries.len() {
        match &entries[i] {
            WalEntry::TXN_BEGIN { txn_id } => {
                let mut j = i + 1;
                let mut commit_at = None;
                while j < entries.len() {
                    if let WalEntry::TXN_COMMIT { txn_id: other } = &entries[j] {
                        if other == txn_id {
                            commit_at = Some(j);
                            break;
                        }
                    }
                    j += 1;
                }
                if let Some(commit_at) = commit_at {
                    for entry in &entries[i + 1..commit_at] {
                        apply_single_entry(entry, docs, order, index_defs);
                    }
                    i = commit_at + 1;
                } else {
                    warn!(txn_id, "transaction begin without matching commit, discarding its entries on replay");
                    i = entries.len();
                }
            }
            WalEntry::TXN_COMMIT { .. } => {
                i += 1;
            }
            other => {
                apply_single_entry(other, docs, order, index_defs);
                i += 1;
            }
        }
    }
}

fn apply_single_entry(entry: &WalEntry, docs: &mut HashMap<String, Value>, order: &mut Vec<String>, index_defs: &mut Vec<IndexDef>) {
    match entry {
        WalEntry::INSERT { doc } => {
            if let Some(id) = doc.get(ID_FIELD).and_then(Value::as_str) {
                if !docs.contains_key(id) {
                    order.push(id.to_string());
                }
                docs.insert(id.to_string(), doc.clone());
            }
        }
        WalEntry::UPDATE { id, patch } => {
            if let Some(existing) = docs.get_mut(id) {
                if let (Some(obj), Some(patch_obj)) = (existing.as_object_mut(), patch.as_object()) {
                    for (k, v) in patch_obj {
                        if k != ID_FIELD && k != wise_json_core::document::CREATED_AT_FIELD {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
        WalEntry::REMOVE { id } => {
            docs.remove(id);
            order.retain(|existing| existing != id);
        }
        WalEntry::CLEAR => {
            docs.clear();
            order.clear();
        }
        WalEntry::INDEX_CREATE { field, unique } => {
            index_defs.retain(|d| &d.field_name != field);
            index_defs.push(if *unique { IndexDef::unique(field.clone()) } else { IndexDef::standard(field.clone()) });
        }
        WalEntry::INDEX_DROP { field } => {
            index_defs.retain(|d| &d.field_name != field);
        }
        WalEntry::TXN_BEGIN { .. } | WalEntry::TXN_COMMIT { .. } => unreachable!("handled by replay_entries"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn insert_get_find_round_trip() {
        let root = tempdir().unwrap();
        let col = Collection::open("widgets", root.path().join("widgets"), CollectionConfig::default()).unwrap();

        let doc = col.insert(obj(json!({"name": "sprocket", "qty": 3}))).await.unwrap();
        let id = doc.get("_id").unwrap().as_str().unwrap().to_string();

        assert_eq!(col.get_by_id(&id).unwrap().get("name").unwrap(), "sprocket");
        let found = col.find(&json!({"name": "sprocket"}), None).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn find_applies_inclusion_projection_and_keeps_id() {
        let root = tempdir().unwrap();
        let col = Collection::open("widgets", root.path().join("widgets"), CollectionConfig::default()).unwrap();
        col.insert(obj(json!({"name": "sprocket", "qty": 3, "secret": "shh"}))).await.unwrap();

        let found = col.find(&json!({"name": "sprocket"}), Some(&json!({"name": 1}))).unwrap();
        assert_eq!(found.len(), 1);
        let doc = &found[0];
        assert_eq!(doc.get("name").unwrap(), "sprocket");
        assert!(doc.get("qty").is_none());
        assert!(doc.get("secret").is_none());
        assert!(doc.get("_id").is_some());
    }

    /// A committed transaction's effects can be durably compensated
    /// (undone) via a compensating WAL sequence, and the reverted state
    /// survives a reopen — the rollback half of the cross-collection
    /// commit path's partial-failure handling.
    #[tokio::test]
    async fn compensate_durably_reverts_a_committed_transaction() {
        let root = tempdir().unwrap();
        let dir = root.path().join("ledger");
        let col = Collection::open("ledger", dir.clone(), CollectionConfig::default()).unwrap();
        col.insert(obj(json!({"_id": "keep", "balance": 1}))).await.unwrap();

        let before = {
            let guard = col.lock_for_transaction().unwrap();
            col.snapshot(&guard)
        };

        {
            let mut guard = col.lock_for_transaction().unwrap();
            let ops = vec![wise_json_concurrency::StagedOp::Insert(json!({"_id": "new", "balance": 5}))];
            let prepared = col.validate_staged_ops(&guard, &ops).unwrap();
            col.commit_prepared(&mut guard, "txn-1", prepared).unwrap();
        }
        assert!(col.get_by_id("new").is_some());

        {
            let mut guard = col.lock_for_transaction().unwrap();
            col.compensate(&mut guard, "txn-1-rollback", before).unwrap();
        }
        assert!(col.get_by_id("new").is_none());
        assert!(col.get_by_id("keep").is_some());

        col.close().await.unwrap();
        let reopened = Collection::open("ledger", dir, CollectionConfig::default()).unwrap();
        assert!(reopened.get_by_id("new").is_none());
        assert!(reopened.get_by_id("keep").is_some());
    }

    #[tokio::test]
    async fn find_rejects_mixed_projection() {
        let root = tempdir().unwrap();
        let col = Collection::open("widgets", root.path().join("widgets"), CollectionConfig::default()).unwrap();
        col.insert(obj(json!({"name": "sprocket", "qty": 3}))).await.unwrap();

        let err = col.find(&json!({}), Some(&json!({"name": 1, "qty": 0}))).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// S2 — insertMany is all-or-nothing against a unique index.
    #[tokio::test]
    async fn insert_many_is_all_or_nothing_against_unique_index() {
        let root = tempdir().unwrap();
        let col = Collection::open("users", root.path().join("users"), CollectionConfig::default()).unwrap();
        col.create_index("email", true).await.unwrap();
        col.insert(obj(json!({"email": "a@example.com"}))).await.unwrap();

        let batch = vec![
            obj(json!({"email": "b@example.com"})),
            obj(json!({"email": "a@example.com"})), // duplicate, should abort the whole batch
            obj(json!({"email": "c@example.com"})),
        ];
        let err = col.insert_many(batch).await.unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { .. }));

        // Neither b@ nor c@ should have been inserted.
        assert!(col.find_one(&json!({"email": "b@example.com"}), None).unwrap().is_none());
        assert!(col.find_one(&json!({"email": "c@example.com"}), None).unwrap().is_none());
        assert_eq!(col.count(None).unwrap(), 1);
    }

    /// S1 — after a restart, a collection recovers its documents,
    /// indexes, and liveness state from checkpoint + WAL together.
    #[tokio::test]
    async fn recovers_documents_and_indexes_across_reopen() {
        let root = tempdir().unwrap();
        let dir = root.path().join("accounts");

        let id = {
            let col = Collection::open("accounts", dir.clone(), CollectionConfig::default()).unwrap();
            col.create_index("email", true).await.unwrap();
            let doc = col.insert(obj(json!({"email": "p@example.com", "balance": 10}))).await.unwrap();
            let id = doc.get("_id").unwrap().as_str().unwrap().to_string();
            col.update(id.clone(), obj(json!({"balance": 20}))).await.unwrap();
            col.close().await.unwrap();
            id
        };

        let col = Collection::open("accounts", dir, CollectionConfig::default()).unwrap();
        let doc = col.get_by_id(&id).unwrap();
        assert_eq!(doc.get("balance").unwrap(), 20);
        assert_eq!(
            col.find_one_by_indexed_value("email", &json!("p@example.com")).unwrap().get("_id").unwrap(),
            &json!(id)
        );

        // Unique constraint survives the reopen too.
        let dup = col.insert(obj(json!({"email": "p@example.com"}))).await;
        assert!(matches!(dup, Err(Error::UniqueConstraint { .. })));
    }

    /// S3 — an expired document is invisible to reads and reports its
    /// deciding TTL field via `ttl_state` up until it's swept.
    #[tokio::test]
    async fn expired_document_is_invisible_and_reports_ttl_state() {
        let root = tempdir().unwrap();
        let col = Collection::open("sessions", root.path().join("sessions"), CollectionConfig::default()).unwrap();

        let now = Utc::now().timestamp_millis();
        let doc = col.insert(obj(json!({"expireAt": now + 50}))).await.unwrap();
        let id = doc.get("_id").unwrap().as_str().unwrap().to_string();

        assert_eq!(
            col.ttl_state(&id).unwrap(),
            wise_json_storage::TtlState::ExpireAt { expired: false }
        );

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(col.get_by_id(&id).is_none());
        assert!(col.ttl_state(&id).is_none());
    }
}
