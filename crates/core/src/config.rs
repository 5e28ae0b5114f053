//! Recognized configuration options (spec.md §6).
//!
//! Each collection may be opened with a [`CollectionConfig`]; the
//! containing [`DatabaseConfig`] supplies collection-wide defaults that
//! individual `collection()` calls may override.

use crate::document::{IdGenerator, UuidV4Generator};
use std::sync::Arc;

/// WAL corruption-recovery policy (spec.md §4.2, `walReadOptions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalReadOptions {
    /// When `true`, a line that fails to parse is logged and skipped
    /// rather than aborting the read.
    pub recover: bool,
    /// When `true` (and `recover` is `false`), a line that fails to
    /// parse fails the whole read with a corrupted-storage error.
    /// When both are `false`, corrupted lines are silently skipped
    /// without even a `recover=true` guarantee of being logged loudly —
    /// but this port always logs at `warn!` regardless, since silent
    /// data loss is worth a log line even when not strictly required.
    pub strict: bool,
}

impl Default for WalReadOptions {
    fn default() -> Self {
        WalReadOptions {
            recover: true,
            strict: false,
        }
    }
}

/// Per-collection configuration (spec.md §6).
#[derive(Clone)]
pub struct CollectionConfig {
    /// Segmentation threshold for checkpoint data files. Default 1 MiB.
    pub max_segment_size_bytes: usize,
    /// `serde_json` pretty-print indent width, or `None` for compact
    /// output. Default `Some(2)`.
    pub json_indent: Option<usize>,
    /// fsync after every WAL append when `true`. Default `false`.
    pub wal_force_sync: bool,
    /// Timer period for automatic checkpointing; `0` disables the
    /// timer trigger. Default `0`.
    pub checkpoint_interval_ms: u64,
    /// WAL-entry-count trigger for automatic checkpointing; `0`
    /// disables the count trigger. Default `0`.
    pub max_wal_entries_before_checkpoint: u64,
    /// Number of checkpoint generations to retain. Default `2`.
    pub checkpoints_to_keep: usize,
    /// Period of the background TTL sweep timer; `0` disables it
    /// (opportunistic sweeps before `count`/`getAll` still run).
    /// Default `60_000`.
    pub ttl_cleanup_interval_ms: u64,
    /// Id generator for documents inserted without an explicit `_id`.
    /// Default: random UUID v4.
    pub id_generator: Arc<dyn IdGenerator>,
    /// WAL corruption-recovery policy used on open.
    pub wal_read_options: WalReadOptions,
}

impl std::fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("max_segment_size_bytes", &self.max_segment_size_bytes)
            .field("json_indent", &self.json_indent)
            .field("wal_force_sync", &self.wal_force_sync)
            .field("checkpoint_interval_ms", &self.checkpoint_interval_ms)
            .field(
                "max_wal_entries_before_checkpoint",
                &self.max_wal_entries_before_checkpoint,
            )
            .field("checkpoints_to_keep", &self.checkpoints_to_keep)
            .field("ttl_cleanup_interval_ms", &self.ttl_cleanup_interval_ms)
            .field("wal_read_options", &self.wal_read_options)
            .finish()
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            max_segment_size_bytes: 1024 * 1024,
            json_indent: Some(2),
            wal_force_sync: false,
            checkpoint_interval_ms: 0,
            max_wal_entries_before_checkpoint: 0,
            checkpoints_to_keep: 2,
            ttl_cleanup_interval_ms: 60_000,
            id_generator: Arc::new(UuidV4Generator),
            wal_read_options: WalReadOptions::default(),
        }
    }
}

impl CollectionConfig {
    /// Builder-style setter for `max_segment_size_bytes`.
    pub fn with_max_segment_size_bytes(mut self, v: usize) -> Self {
        self.max_segment_size_bytes = v;
        self
    }

    /// Builder-style setter for `json_indent`.
    pub fn with_json_indent(mut self, v: Option<usize>) -> Self {
        self.json_indent = v;
        self
    }

    /// Builder-style setter for `wal_force_sync`.
    pub fn with_wal_force_sync(mut self, v: bool) -> Self {
        self.wal_force_sync = v;
        self
    }

    /// Builder-style setter for `checkpoint_interval_ms`.
    pub fn with_checkpoint_interval_ms(mut self, v: u64) -> Self {
        self.checkpoint_interval_ms = v;
        self
    }

    /// Builder-style setter for `max_wal_entries_before_checkpoint`.
    pub fn with_max_wal_entries_before_checkpoint(mut self, v: u64) -> Self {
        self.max_wal_entries_before_checkpoint = v;
        self
    }

    /// Builder-style setter for `checkpoints_to_keep`.
    pub fn with_checkpoints_to_keep(mut self, v: usize) -> Self {
        self.checkpoints_to_keep = v.max(1);
        self
    }

    /// Builder-style setter for `ttl_cleanup_interval_ms`.
    pub fn with_ttl_cleanup_interval_ms(mut self, v: u64) -> Self {
        self.ttl_cleanup_interval_ms = v;
        self
    }

    /// Builder-style setter for `id_generator`.
    pub fn with_id_generator(mut self, v: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = v;
        self
    }

    /// Builder-style setter for `wal_read_options`.
    pub fn with_wal_read_options(mut self, v: WalReadOptions) -> Self {
        self.wal_read_options = v;
        self
    }
}

/// Database-wide defaults applied to every collection opened through
/// it, unless the caller supplies a collection-specific override.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Default configuration handed to each newly opened collection.
    pub default_collection_config: DefaultCollectionConfig,
}

/// A [`CollectionConfig`] that derives `Debug`/`Clone`/`Default` by
/// storing the non-`Debug` id generator behind the same `Arc` the
/// collection config uses, and delegating everything else.
#[derive(Clone)]
pub struct DefaultCollectionConfig(pub CollectionConfig);

impl std::fmt::Debug for DefaultCollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for DefaultCollectionConfig {
    fn default() -> Self {
        DefaultCollectionConfig(CollectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = CollectionConfig::default();
        assert_eq!(c.max_segment_size_bytes, 1024 * 1024);
        assert_eq!(c.json_indent, Some(2));
        assert!(!c.wal_force_sync);
        assert_eq!(c.checkpoint_interval_ms, 0);
        assert_eq!(c.max_wal_entries_before_checkpoint, 0);
        assert_eq!(c.checkpoints_to_keep, 2);
        assert_eq!(c.ttl_cleanup_interval_ms, 60_000);
        assert!(c.wal_read_options.recover);
        assert!(!c.wal_read_options.strict);
    }

    #[test]
    fn builder_setters_compose() {
        let c = CollectionConfig::default()
            .with_checkpoints_to_keep(5)
            .with_wal_force_sync(true);
        assert_eq!(c.checkpoints_to_keep, 5);
        assert!(c.wal_force_sync);
    }

    #[test]
    fn checkpoints_to_keep_is_clamped_to_at_least_one() {
        let c = CollectionConfig::default().with_checkpoints_to_keep(0);
        assert_eq!(c.checkpoints_to_keep, 1);
    }
}
