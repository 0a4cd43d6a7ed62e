//! Store configuration.

use std::path::PathBuf;

/// How re-ingestion of already-stored content is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// One history entry per distinct payload: re-ingesting known bytes
    /// bumps the existing entry's access time and returns it with the
    /// same identity. The authoritative policy.
    #[default]
    UniqueContent,
    /// Every ingest creates a new entry; entries sharing a payload are
    /// tracked through the blob refcount. The older policy, kept for
    /// bounded-retention use where individual entries expire.
    RefCounted,
}

/// Configuration for a [`super::HistoryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory owning the `cas/` tree and the index database.
    /// Exactly one store instance may use a given root at a time.
    pub root: PathBuf,
    /// Deduplication policy for repeated content.
    pub dedup_policy: DedupPolicy,
    /// Maximum number of history entries to retain; 0 disables the
    /// bound (the default). When exceeded, the least recently accessed
    /// entries are evicted until the count matches the limit.
    pub retention_limit: u32,
}

impl StoreConfig {
    /// Configuration with default policy (content-unique, unbounded)
    /// under the given root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dedup_policy: DedupPolicy::default(),
            retention_limit: 0,
        }
    }

    /// Set the deduplication policy.
    #[must_use]
    pub const fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    /// Set the retention bound (0 disables).
    #[must_use]
    pub const fn with_retention_limit(mut self, limit: u32) -> Self {
        self.retention_limit = limit;
        self
    }
}
