//! # WiseJSON
//!
//! An embedded, single-process JSON document store: write-ahead logged,
//! checkpointed, with secondary indexes, TTL expiration, and
//! cross-collection transactions.
//!
//! # Quick start
//!
//! ```no_run
//! use wise_json::{Database, DatabaseConfig};
//! use serde_json::json;
//!
//! # async fn run() -> wise_json::Result<()> {
//! let db = Database::open("./my-data", DatabaseConfig::default())?;
//! let users = db.collection("users").await?;
//!
//! let alice = users.insert(json!({"name": "alice", "email": "alice@example.com"}).as_object().unwrap().clone()).await?;
//! users.create_index("email", true).await?;
//!
//! let found = users.find_one(&json!({"email": "alice@example.com"}), None)?;
//! assert_eq!(found, Some(alice));
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! [`Database`] is the entry point; it recovers and caches
//! [`Collection`] handles by name. Internal crates (`wise-json-core`,
//! `wise-json-durability`, `wise-json-storage`, `wise-json-concurrency`,
//! `wise-json-engine`) are implementation detail and are not exposed.
//! Only the public API surface re-exported here is stable.

#![warn(missing_docs)]

pub use wise_json_core::{CollectionConfig, DatabaseConfig, Error, IndexDef, IndexType, Result, WalReadOptions};
pub use wise_json_engine::{
    commit_transaction, Collection, CollectionEvent, CollectionStats, Database, LifecycleState,
    ShutdownRegistry, UpdateSummary, UpsertOutcome,
};
pub use wise_json_concurrency::{StagedOp, Transaction, TransactionManager, TxnState};
pub use wise_json_storage::{Filter, FilterError, TtlState};
