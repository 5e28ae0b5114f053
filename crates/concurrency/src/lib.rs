//! Concurrency primitives for WiseJSON: the per-collection write queue,
//! the exclusive directory lock, and cross-collection transaction
//! staging/lock-ordering.
//!
//! What actually *applies* a staged transaction or a queued write job
//! lives in `wise-json-engine`, which owns the document state these
//! primitives serialize access to.

#![warn(missing_docs)]

pub mod lock;
pub mod queue;
pub mod transaction;

pub use lock::DirectoryLock;
pub use queue::WriteQueue;
pub use transaction::{CollectionOp, StagedOp, Transaction, TransactionManager, TxnState};
