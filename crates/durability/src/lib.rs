//! Crash-safe persistence primitives for WiseJSON: atomic file I/O, the
//! write-ahead log, and segmented checkpoints.
//!
//! This crate knows nothing about collections, indexes, or the write
//! queue — it only knows how to durably persist and recover a stream
//! of documents and WAL entries for a name. `wise-json-engine` composes
//! these primitives into the collection lifecycle.

#![warn(missing_docs)]

pub mod atomic;
pub mod checkpoint;
pub mod wal;

pub use atomic::{atomic_write, atomic_write_json, read_json_with_recovery};
pub use checkpoint::{
    load_latest_checkpoint, prune_old_checkpoints, write_checkpoint, CheckpointError,
    CheckpointInfo, CheckpointMeta, LoadedCheckpoint,
};
pub use wal::{read_wal, WalEntry, WalError, WalWriter};
