//! Shared types for WiseJSON: documents, configuration, errors, and the
//! canonical index-key encoding.
//!
//! This crate has no knowledge of disk layout, WAL format, or the write
//! queue — those live in `wise-json-durability`, `wise-json-storage`,
//! and `wise-json-concurrency` respectively, all of which depend on
//! this crate for the vocabulary they share.

#![warn(missing_docs)]

pub mod canonical;
pub mod config;
pub mod document;
pub mod error;
pub mod index_def;

pub use canonical::canonical_key;
pub use config::{CollectionConfig, DatabaseConfig, WalReadOptions};
pub use document::{now_iso8601, Document, IdGenerator, UuidV4Generator};
pub use error::{Error, Result};
pub use index_def::{IndexDef, IndexType};
