//! Blob refcount ledger.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::model::BlobRecord;
use crate::Result;

/// Repository tracking `{hash, size, refcount}` per stored payload.
pub struct BlobLedger {
    pool: SqlitePool,
}

impl BlobLedger {
    /// Create a ledger over an existing connection pool.
    ///
    /// Creates the table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let ledger = Self { pool };
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Create an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema
    /// creation fails.
    #[allow(dead_code)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::new(pool).await
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS blobs (
                hash TEXT PRIMARY KEY NOT NULL,
                size_bytes INTEGER NOT NULL,
                ref_count INTEGER NOT NULL DEFAULT 1
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up the ledger entry for a hash.
    ///
    /// Returns `None` if the payload has never been stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn lookup(&self, hash: &str) -> Result<Option<BlobRecord>> {
        let row = sqlx::query(
            r"
            SELECT hash, size_bytes, ref_count
            FROM blobs
            WHERE hash = ?
            ",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Register a newly stored payload with a refcount of 1.
    ///
    /// Only invoked after the payload's byte file is durably on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails (including a
    /// duplicate hash, which the orchestrator's lookup-first flow rules
    /// out).
    pub async fn create(&self, hash: &str, size_bytes: u64) -> Result<()> {
        #[allow(clippy::cast_possible_wrap)]
        let size = size_bytes as i64;
        sqlx::query(
            r"
            INSERT INTO blobs (hash, size_bytes, ref_count)
            VALUES (?, ?, 1)
            ",
        )
        .bind(hash)
        .bind(size)
        .execute(&self.pool)
        .await?;

        debug!(hash, size_bytes, "registered blob");
        Ok(())
    }

    /// Add one reference to an existing blob.
    ///
    /// # Panics
    ///
    /// Panics if the hash is unknown: referencing an unregistered blob
    /// is a ledger bug, not a runtime condition.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn increment_ref(&self, hash: &str) -> Result<u32> {
        let result = sqlx::query(
            r"
            UPDATE blobs SET ref_count = ref_count + 1
            WHERE hash = ?
            ",
        )
        .bind(hash)
        .execute(&self.pool)
        .await?;
        assert!(
            result.rows_affected() == 1,
            "blob ledger: increment_ref on unknown hash {hash}"
        );

        let record = self.lookup(hash).await?;
        Ok(record.map_or(0, |r| r.ref_count))
    }

    /// Drop one reference from a blob, returning the new count.
    ///
    /// Reaching zero deletes the ledger entry in the same call; the
    /// caller must then delete the backing file so the two never outlive
    /// each other.
    ///
    /// # Panics
    ///
    /// Panics if the hash is unknown or the refcount is already zero.
    /// Either indicates a ledger bug and must be loud, not clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn decrement_ref(&self, hash: &str) -> Result<u32> {
        let row = sqlx::query(r"SELECT ref_count FROM blobs WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        let count: i64 = row.map_or_else(
            || panic!("blob ledger: decrement_ref on unknown hash {hash}"),
            |row| row.get("ref_count"),
        );
        assert!(count > 0, "blob ledger: ref_count already zero for {hash}");

        if count == 1 {
            sqlx::query(r"DELETE FROM blobs WHERE hash = ?")
                .bind(hash)
                .execute(&self.pool)
                .await?;
            debug!(hash, "blob unreferenced");
            return Ok(0);
        }

        sqlx::query(r"UPDATE blobs SET ref_count = ref_count - 1 WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok((count - 1) as u32)
    }

    /// All ledger entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<BlobRecord>> {
        let rows = sqlx::query(
            r"
            SELECT hash, size_bytes, ref_count
            FROM blobs
            ORDER BY hash ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Total size in bytes of all distinct stored payloads.
    ///
    /// Each blob counts once regardless of how many entries reference
    /// it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn total_size_bytes(&self) -> Result<u64> {
        let row = sqlx::query(r"SELECT COALESCE(SUM(size_bytes), 0) AS total FROM blobs")
            .fetch_one(&self.pool)
            .await?;

        let total: i64 = row.get("total");
        #[allow(clippy::cast_sign_loss)]
        Ok(total as u64)
    }

    /// Delete every ledger entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query(r"DELETE FROM blobs").execute(&self.pool).await?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> BlobRecord {
    BlobRecord {
        hash: row.get("hash"),
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        ref_count: row.get::<i64, _>("ref_count") as u32,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_lookup() {
        let ledger = BlobLedger::in_memory().await.unwrap();

        ledger.create("abc", 42).await.unwrap();

        let record = ledger.lookup("abc").await.unwrap().unwrap();
        assert_eq!(record.size_bytes, 42);
        assert_eq!(record.ref_count, 1);
    }

    #[tokio::test]
    async fn lookup_unknown_is_none() {
        let ledger = BlobLedger::in_memory().await.unwrap();
        assert!(ledger.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refcount_steps_up_and_down() {
        let ledger = BlobLedger::in_memory().await.unwrap();
        ledger.create("abc", 10).await.unwrap();

        assert_eq!(ledger.increment_ref("abc").await.unwrap(), 2);
        assert_eq!(ledger.decrement_ref("abc").await.unwrap(), 1);
        assert_eq!(ledger.decrement_ref("abc").await.unwrap(), 0);

        // Reaching zero removed the row entirely.
        assert!(ledger.lookup("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "unknown hash")]
    async fn decrement_unknown_hash_panics() {
        let ledger = BlobLedger::in_memory().await.unwrap();
        let _ = ledger.decrement_ref("missing").await;
    }

    #[tokio::test]
    async fn total_size_counts_each_blob_once() {
        let ledger = BlobLedger::in_memory().await.unwrap();
        ledger.create("a", 100).await.unwrap();
        ledger.create("b", 50).await.unwrap();
        ledger.increment_ref("a").await.unwrap();

        assert_eq!(ledger.total_size_bytes().await.unwrap(), 150);
    }

    #[tokio::test]
    async fn delete_all_empties_the_ledger() {
        let ledger = BlobLedger::in_memory().await.unwrap();
        ledger.create("a", 1).await.unwrap();
        ledger.create("b", 2).await.unwrap();

        ledger.delete_all().await.unwrap();

        assert!(ledger.list().await.unwrap().is_empty());
        assert_eq!(ledger.total_size_bytes().await.unwrap(), 0);
    }
}
