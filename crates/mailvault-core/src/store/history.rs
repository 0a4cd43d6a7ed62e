//! The composed history store.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::fs;
use tokio::sync::{Mutex, watch};
use tracing::debug;

use super::config::{DedupPolicy, StoreConfig};
use crate::blob::BlobLedger;
use crate::clock::{Clock, SystemClock};
use crate::content::ContentStore;
use crate::hash::content_hash;
use crate::history::{
    CacheStats, EmailMetadata, EntryId, HistoryFilter, HistoryIndex, HistoryQuery, HistoryRecord,
    SortDirection, SortField,
};
use crate::{Error, Result};

/// Filename of the metadata database under the store root.
const INDEX_DB: &str = "index.db";

/// An immutable, point-in-time materialization of the record set in the
/// default most-recent ordering. Cheap to clone and safe to read from
/// any task.
pub type HistorySnapshot = Arc<Vec<HistoryRecord>>;

/// Content-addressable payload store with a queryable history index.
///
/// One instance owns its root directory (the `cas/` tree plus the index
/// database) exclusively. All mutations serialize through a single
/// internal lock; queries run against committed state and never block
/// mutations. After every committed mutation the store publishes a
/// fresh [`HistorySnapshot`] to subscribers.
pub struct HistoryStore {
    content: ContentStore,
    ledger: BlobLedger,
    index: HistoryIndex,
    clock: Arc<dyn Clock>,
    dedup_policy: DedupPolicy,
    retention_limit: u32,
    mutation: Mutex<()>,
    snapshot_tx: watch::Sender<HistorySnapshot>,
}

impl HistoryStore {
    /// Open (creating if needed) a store under the configured root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree or database cannot be
    /// created.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open a store with an injected clock. Tests use this to make
    /// access-time ordering deterministic.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree or database cannot be
    /// created.
    pub async fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        fs::create_dir_all(&config.root).await?;
        let db_path = config.root.join(INDEX_DB);
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::build(config, pool, clock).await
    }

    /// Open a store whose metadata index lives in memory, for testing.
    /// Payload files still go under the configured root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree or database cannot be
    /// created.
    #[allow(dead_code)]
    pub async fn in_memory(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        fs::create_dir_all(&config.root).await?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::build(config, pool, clock).await
    }

    async fn build(config: StoreConfig, pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        let content = ContentStore::open(&config.root).await?;
        let ledger = BlobLedger::new(pool.clone()).await?;
        let index = HistoryIndex::new(pool).await?;

        let initial = index.query(&HistoryQuery::default()).await?;
        let (snapshot_tx, _) = watch::channel(Arc::new(initial));

        Ok(Self {
            content,
            ledger,
            index,
            clock,
            dedup_policy: config.dedup_policy,
            retention_limit: config.retention_limit,
            mutation: Mutex::new(()),
            snapshot_tx,
        })
    }

    /// Ingest a payload, returning its history entry.
    ///
    /// Never-seen content is written to disk first, then registered in
    /// the ledger, then indexed — a reader can never observe an entry
    /// whose payload is missing or partial. Known content either bumps
    /// the existing entry (content-unique policy) or adds another entry
    /// against the shared payload (ref-counted policy). A blank
    /// `display_name` falls back to "Untitled".
    ///
    /// Ingest is atomic from the caller's perspective: if the byte
    /// write fails, neither a ledger entry nor a history entry exists
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload write or a database query fails.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        display_name: &str,
        source_ref: Option<&str>,
        metadata: Option<EmailMetadata>,
    ) -> Result<HistoryRecord> {
        let _guard = self.mutation.lock().await;

        let hash = content_hash(bytes);
        let now = self.clock.now_millis();
        let name = if display_name.trim().is_empty() {
            "Untitled"
        } else {
            display_name
        };
        let email = metadata.unwrap_or_default();

        let known = self.ledger.lookup(&hash).await?;
        let record = match (known, self.dedup_policy) {
            (Some(_), DedupPolicy::UniqueContent) => {
                let existing = self.index.find_by_blob_hash(&hash).await?.unwrap_or_else(|| {
                    panic!("history store: blob {hash} has no index entry")
                });
                self.index.touch(existing.id, now).await?;
                debug!(hash, id = %existing.id, "re-ingest of known content");
                HistoryRecord {
                    last_accessed: now,
                    ..existing
                }
            }
            (Some(_), DedupPolicy::RefCounted) => {
                self.ledger.increment_ref(&hash).await?;
                self.index.insert(&hash, name, source_ref, now, &email).await?
            }
            (None, _) => {
                self.content.write(&hash, bytes).await?;
                self.ledger.create(&hash, bytes.len() as u64).await?;
                self.index.insert(&hash, name, source_ref, now, &email).await?
            }
        };

        self.enforce_retention().await?;
        self.publish_snapshot().await?;
        Ok(record)
    }

    /// Mark an entry as accessed now, returning the updated entry.
    /// `None` for an unknown ID — not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn access(&self, id: EntryId) -> Result<Option<HistoryRecord>> {
        let _guard = self.mutation.lock().await;

        let Some(record) = self.index.get(id).await? else {
            return Ok(None);
        };
        let now = self.clock.now_millis();
        self.index.touch(id, now).await?;
        self.publish_snapshot().await?;

        Ok(Some(HistoryRecord {
            last_accessed: now,
            ..record
        }))
    }

    /// Delete an entry and drop its payload reference; the payload file
    /// goes with the last reference. No-op for an unknown ID.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query or file deletion fails.
    pub async fn delete(&self, id: EntryId) -> Result<()> {
        let _guard = self.mutation.lock().await;

        let Some(record) = self.index.get(id).await? else {
            return Ok(());
        };
        self.index.delete(id).await?;
        self.drop_blob_reference(&record.blob_hash).await?;
        self.publish_snapshot().await?;
        Ok(())
    }

    /// Delete every entry, every ledger row, and every payload file.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query or the file sweep fails.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;

        self.index.delete_all().await?;
        self.ledger.delete_all().await?;
        self.content.remove_all().await?;
        self.publish_snapshot().await?;
        debug!("cleared all history");
        Ok(())
    }

    /// Entry count and total size across distinct stored payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let _guard = self.mutation.lock().await;

        Ok(CacheStats {
            entry_count: self.index.count().await?,
            total_size_bytes: self.ledger.total_size_bytes().await?,
        })
    }

    /// Get an entry by ID without touching its access time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: EntryId) -> Result<Option<HistoryRecord>> {
        self.index.get(id).await
    }

    /// Open an entry's payload for reading. `None` for an unknown ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlobMissing`] if the entry exists but its
    /// payload file does not — that is corruption, not normal absence.
    pub async fn open_payload(&self, id: EntryId) -> Result<Option<tokio::fs::File>> {
        let Some(record) = self.index.get(id).await? else {
            return Ok(None);
        };
        match self.content.open_payload(&record.blob_hash).await? {
            Some(file) => Ok(Some(file)),
            None => Err(Error::BlobMissing(record.blob_hash)),
        }
    }

    /// Read an entry's payload into memory. `None` for an unknown ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlobMissing`] if the entry exists but its
    /// payload file does not.
    pub async fn read_payload(&self, id: EntryId) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.index.get(id).await? else {
            return Ok(None);
        };
        match self.content.read(&record.blob_hash).await? {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(Error::BlobMissing(record.blob_hash)),
        }
    }

    /// Free-text search in the default most-recent ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn search(&self, search: &str) -> Result<Vec<HistoryRecord>> {
        self.index.search(search).await
    }

    /// All entries ordered by the given field and direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn sort_by(
        &self,
        field: SortField,
        direction: SortDirection,
    ) -> Result<Vec<HistoryRecord>> {
        self.index.sort_by(field, direction).await
    }

    /// Entries matching every set filter predicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn filter(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        self.index.filter(filter).await
    }

    /// Composed listing: search, filters, and ordering AND-composed in
    /// one query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        self.index.query(query).await
    }

    /// Subscribe to snapshot publication. The receiver always holds the
    /// latest snapshot and is notified after every committed mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HistorySnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> HistorySnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Drop one reference to a payload; delete the file when the last
    /// reference goes. Cross-checks the ledger against the index —
    /// drift between the two is a bug and panics.
    async fn drop_blob_reference(&self, hash: &str) -> Result<()> {
        let remaining = self.ledger.decrement_ref(hash).await?;
        let index_refs = self.index.count_by_blob_hash(hash).await?;
        assert_eq!(
            u64::from(remaining),
            index_refs,
            "history store: refcount drift for blob {hash}"
        );

        if remaining == 0 {
            self.content.remove(hash).await?;
        }
        Ok(())
    }

    /// Evict least-recently-accessed entries until the count is back at
    /// the retention limit. Runs after every insert; disabled at 0.
    async fn enforce_retention(&self) -> Result<()> {
        if self.retention_limit == 0 {
            return Ok(());
        }
        let limit = u64::from(self.retention_limit);

        while self.index.count().await? > limit {
            let Some(victim) = self.index.oldest_by_access().await? else {
                break;
            };
            debug!(id = %victim.id, hash = victim.blob_hash, "evicting least recently accessed entry");
            self.index.delete(victim.id).await?;
            self.drop_blob_reference(&victim.blob_hash).await?;
        }
        Ok(())
    }

    /// Materialize and publish the current record set. Called with the
    /// mutation lock held so snapshots publish in commit order.
    async fn publish_snapshot(&self) -> Result<()> {
        let records = self.index.query(&HistoryQuery::default()).await?;
        self.snapshot_tx.send_replace(Arc::new(records));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn store_at(
        dir: &tempfile::TempDir,
        policy: DedupPolicy,
        limit: u32,
        clock: Arc<ManualClock>,
    ) -> HistoryStore {
        let config = StoreConfig::new(dir.path())
            .with_dedup_policy(policy)
            .with_retention_limit(limit);
        HistoryStore::open_with_clock(config, clock).await.unwrap()
    }

    fn email(subject: &str) -> EmailMetadata {
        EmailMetadata {
            subject: subject.to_string(),
            ..EmailMetadata::default()
        }
    }

    #[tokio::test]
    async fn ingest_stores_payload_and_indexes_it() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, clock).await;

        let record = store
            .ingest(b"raw email bytes", "mail.eml", Some("content://inbox/7"), Some(email("Hi")))
            .await
            .unwrap();

        assert_eq!(record.display_name, "mail.eml");
        assert_eq!(record.last_accessed, 1_000);
        assert_eq!(record.email.subject, "Hi");
        assert_eq!(
            store.read_payload(record.id).await.unwrap().unwrap(),
            b"raw email bytes"
        );

        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size_bytes, 15);
    }

    #[tokio::test]
    async fn ingest_twice_yields_same_hash() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::RefCounted, 0, clock).await;

        let a = store.ingest(b"same bytes", "a", None, None).await.unwrap();
        let b = store.ingest(b"same bytes", "b", None, None).await.unwrap();
        assert_eq!(a.blob_hash, b.blob_hash);
    }

    #[tokio::test]
    async fn unique_policy_dedups_to_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, Arc::clone(&clock)).await;

        let first = store.ingest(b"payload", "first", None, None).await.unwrap();
        clock.advance(500);
        let second = store.ingest(b"payload", "second", None, None).await.unwrap();

        // Same identity back; the second ingest only bumped access time.
        assert_eq!(second.id, first.id);
        assert_eq!(second.display_name, "first");
        assert_eq!(second.last_accessed, 1_500);

        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn refcounted_policy_shares_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::RefCounted, 0, clock).await;

        let a = store.ingest(b"shared", "a", None, None).await.unwrap();
        let b = store.ingest(b"shared", "b", None, None).await.unwrap();
        assert_ne!(a.id, b.id);

        // Two entries, one payload on disk.
        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size_bytes, 6);

        // Deleting one keeps the file; deleting both removes it.
        let path = dir.path().join("cas").join(&a.blob_hash);
        store.delete(a.id).await.unwrap();
        assert!(path.exists());
        store.delete(b.id).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, clock).await;

        store.delete(EntryId::new(12345)).await.unwrap();
    }

    #[tokio::test]
    async fn access_bumps_and_unknown_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, Arc::clone(&clock)).await;

        let record = store.ingest(b"payload", "a", None, None).await.unwrap();
        clock.advance(250);

        let touched = store.access(record.id).await.unwrap().unwrap();
        assert_eq!(touched.last_accessed, 1_250);
        assert!(store.access(EntryId::new(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eviction_keeps_newest_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::RefCounted, 2, Arc::clone(&clock)).await;

        let one = store.ingest(b"one", "one", None, None).await.unwrap();
        clock.advance(10);
        store.ingest(b"two", "two", None, None).await.unwrap();
        clock.advance(10);
        store.ingest(b"three", "three", None, None).await.unwrap();

        let names: Vec<String> = store
            .search("")
            .await
            .unwrap()
            .iter()
            .map(|r| r.display_name.clone())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"two".to_string()));
        assert!(names.contains(&"three".to_string()));

        // The evicted payload is gone from disk too.
        assert!(!dir.path().join("cas").join(&one.blob_hash).exists());
    }

    #[tokio::test]
    async fn eviction_respects_access_recency() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::RefCounted, 2, Arc::clone(&clock)).await;

        let one = store.ingest(b"one", "one", None, None).await.unwrap();
        clock.advance(10);
        store.ingest(b"two", "two", None, None).await.unwrap();
        clock.advance(10);

        // Touch "one" so "two" becomes the eviction candidate.
        store.access(one.id).await.unwrap();
        clock.advance(10);
        store.ingest(b"three", "three", None, None).await.unwrap();

        let names: Vec<String> = store
            .search("")
            .await
            .unwrap()
            .iter()
            .map(|r| r.display_name.clone())
            .collect();
        assert!(names.contains(&"one".to_string()));
        assert!(names.contains(&"three".to_string()));
        assert!(!names.contains(&"two".to_string()));
    }

    #[tokio::test]
    async fn clear_all_empties_index_ledger_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, clock).await;

        store.ingest(b"one", "one", None, None).await.unwrap();
        store.ingest(b"two", "two", None, None).await.unwrap();
        store.clear_all().await.unwrap();

        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats, CacheStats::default());

        let mut entries = tokio::fs::read_dir(dir.path().join("cas")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_display_name_becomes_untitled() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, clock).await;

        let record = store.ingest(b"payload", "   ", None, None).await.unwrap();
        assert_eq!(record.display_name, "Untitled");
    }

    #[tokio::test]
    async fn snapshots_follow_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store = store_at(&dir, DedupPolicy::UniqueContent, 0, Arc::clone(&clock)).await;

        let mut rx = store.subscribe();
        assert!(store.current_snapshot().is_empty());

        store.ingest(b"one", "one", None, None).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);

        clock.advance(10);
        store.ingest(b"two", "two", None, None).await.unwrap();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.len(), 2);
        // Most recent first in the published view.
        assert_eq!(snapshot[0].display_name, "two");

        store.clear_all().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
    }

    #[tokio::test]
    async fn concurrent_identical_ingests_create_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let store =
            Arc::new(store_at(&dir, DedupPolicy::RefCounted, 0, clock).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .ingest(b"identical bytes", &format!("copy-{i}"), None, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.cache_stats().await.unwrap();
        assert_eq!(stats.entry_count, 8);
        assert_eq!(stats.total_size_bytes, 15);

        let mut entries = tokio::fs::read_dir(dir.path().join("cas")).await.unwrap();
        let mut files = 0;
        while entries.next_entry().await.unwrap().is_some() {
            files += 1;
        }
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn in_memory_variant_behaves_like_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000);
        let config = StoreConfig::new(dir.path());
        let store = HistoryStore::in_memory(config, clock).await.unwrap();

        let record = store.ingest(b"payload", "a", None, None).await.unwrap();
        assert_eq!(
            store.read_payload(record.id).await.unwrap().unwrap(),
            b"payload"
        );
    }
}
