//! History entry storage repository.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::model::{
    BODY_PREVIEW_MAX_CHARS, EmailMetadata, EntryId, HistoryFilter, HistoryQuery, HistoryRecord,
    SortDirection, SortField,
};
use crate::Result;

/// Effective date of an entry: the email's own date when parseable,
/// else the last access time.
const EFFECTIVE_DATE: &str = "CASE WHEN email_date > 0 THEN email_date ELSE last_accessed END";

/// Sender string shown to the user: name when present, else address.
const DISPLAY_SENDER: &str = "CASE WHEN sender_name != '' THEN sender_name ELSE sender_email END";

const SELECT_COLUMNS: &str = "SELECT id, blob_hash, display_name, original_source, last_accessed, \
     subject, sender_email, sender_name, recipient_emails, recipient_names, \
     email_date, has_attachments, body_preview \
     FROM history_entries";

/// Repository for history entry storage, lookup, and querying.
pub struct HistoryIndex {
    pool: SqlitePool,
}

impl HistoryIndex {
    /// Create an index over an existing connection pool.
    ///
    /// Creates the table and indexes if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let index = Self { pool };
        index.initialize().await?;
        Ok(index)
    }

    /// Create an in-memory index for testing.
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
            CREATE TABLE IF NOT EXISTS history_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                blob_hash TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                original_source TEXT,
                last_accessed INTEGER NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                sender_email TEXT NOT NULL DEFAULT '',
                sender_name TEXT NOT NULL DEFAULT '',
                recipient_emails TEXT NOT NULL DEFAULT '',
                recipient_names TEXT NOT NULL DEFAULT '',
                email_date INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                body_preview TEXT NOT NULL DEFAULT ''
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for refcount cross-checks and dedup lookups
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_history_blob_hash
            ON history_entries(blob_hash)
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for eviction (oldest access first)
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_history_last_accessed
            ON history_entries(last_accessed)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new entry and return it with its assigned ID.
    ///
    /// The body preview is truncated to its stored maximum here, so the
    /// persisted record honors the length bound regardless of caller
    /// input.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert(
        &self,
        blob_hash: &str,
        display_name: &str,
        original_source: Option<&str>,
        last_accessed: i64,
        email: &EmailMetadata,
    ) -> Result<HistoryRecord> {
        let body_preview: String = email.body_preview.chars().take(BODY_PREVIEW_MAX_CHARS).collect();

        let result = sqlx::query(
            r"
            INSERT INTO history_entries
                (blob_hash, display_name, original_source, last_accessed, subject,
                 sender_email, sender_name, recipient_emails, recipient_names,
                 email_date, has_attachments, body_preview)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(blob_hash)
        .bind(display_name)
        .bind(original_source)
        .bind(last_accessed)
        .bind(&email.subject)
        .bind(&email.sender_email)
        .bind(&email.sender_name)
        .bind(&email.recipient_emails)
        .bind(&email.recipient_names)
        .bind(email.email_date)
        .bind(email.has_attachments)
        .bind(&body_preview)
        .execute(&self.pool)
        .await?;

        Ok(HistoryRecord {
            id: EntryId::new(result.last_insert_rowid()),
            blob_hash: blob_hash.to_string(),
            display_name: display_name.to_string(),
            original_source: original_source.map(ToString::to_string),
            last_accessed,
            email: EmailMetadata {
                body_preview,
                ..email.clone()
            },
        })
    }

    /// Get an entry by ID. `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: EntryId) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Update an entry's last access time. Returns whether a row
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn touch(&self, id: EntryId, last_accessed: i64) -> Result<bool> {
        let result = sqlx::query(r"UPDATE history_entries SET last_accessed = ? WHERE id = ?")
            .bind(last_accessed)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an entry by ID. Returns false when the entry was already
    /// absent, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: EntryId) -> Result<bool> {
        let result = sqlx::query(r"DELETE FROM history_entries WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query(r"DELETE FROM history_entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of entries in the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM history_entries")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// Number of entries referencing a payload hash.
    ///
    /// The orchestrator cross-checks this against the blob ledger's
    /// refcount when deciding decrement-versus-delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_by_blob_hash(&self, blob_hash: &str) -> Result<u64> {
        let row =
            sqlx::query(r"SELECT COUNT(*) AS count FROM history_entries WHERE blob_hash = ?")
                .bind(blob_hash)
                .fetch_one(&self.pool)
                .await?;

        let count: i64 = row.get("count");
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// The earliest-inserted entry referencing a payload hash, if any.
    ///
    /// Under content-unique deduplication this is *the* entry for the
    /// hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_blob_hash(&self, blob_hash: &str) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE blob_hash = ? ORDER BY id ASC LIMIT 1"
        ))
        .bind(blob_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// The entry least recently accessed — the next eviction candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn oldest_by_access(&self) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} ORDER BY last_accessed ASC, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Free-text search across subject, sender, recipients, and body
    /// preview.
    ///
    /// A blank query matches everything. Results order by effective
    /// date descending, newest-inserted first on ties.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn search(&self, search: &str) -> Result<Vec<HistoryRecord>> {
        self.query(&HistoryQuery {
            search: Some(search.to_string()),
            ..HistoryQuery::default()
        })
        .await
    }

    /// All entries ordered by the given field and direction.
    ///
    /// Ties break by ID ascending so repeated calls over identical data
    /// return identical orderings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn sort_by(
        &self,
        field: SortField,
        direction: SortDirection,
    ) -> Result<Vec<HistoryRecord>> {
        self.query(&HistoryQuery {
            sort: Some((field, direction)),
            ..HistoryQuery::default()
        })
        .await
    }

    /// Entries matching every set predicate, in the default most-recent
    /// ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn filter(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        self.query(&HistoryQuery {
            filter: filter.clone(),
            ..HistoryQuery::default()
        })
        .await
    }

    /// Composed listing: search, filters, and ordering in one query.
    /// Search and filters AND-compose.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        let mut first = true;
        let mut prefix = |builder: &mut QueryBuilder<'_, Sqlite>| {
            builder.push(if first { " WHERE " } else { " AND " });
            first = false;
        };

        let needle = query.search.as_deref().map(str::trim).unwrap_or_default();
        if !needle.is_empty() {
            let pattern = format!("%{}%", needle.to_lowercase());
            prefix(&mut builder);
            builder.push("(");
            for (i, column) in [
                "subject",
                "sender_email",
                "sender_name",
                "recipient_emails",
                "recipient_names",
                "body_preview",
            ]
            .iter()
            .enumerate()
            {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push(format!("LOWER({column}) LIKE "));
                builder.push_bind(pattern.clone());
            }
            builder.push(")");
        }

        if let Some(has_attachments) = query.filter.has_attachments {
            prefix(&mut builder);
            builder.push("has_attachments = ");
            builder.push_bind(has_attachments);
        }

        if let Some((from, to)) = query.filter.date_range {
            prefix(&mut builder);
            builder.push(format!("{EFFECTIVE_DATE} BETWEEN "));
            builder.push_bind(from);
            builder.push(" AND ");
            builder.push_bind(to);
        }

        if let Some(sender) = query
            .filter
            .sender_contains
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let pattern = format!("%{}%", sender.to_lowercase());
            prefix(&mut builder);
            builder.push("(LOWER(sender_email) LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR LOWER(sender_name) LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        builder.push(" ORDER BY ");
        match query.sort {
            None => {
                builder.push(format!("{EFFECTIVE_DATE} DESC, id DESC"));
            }
            Some((field, direction)) => {
                let column = match field {
                    SortField::Date => EFFECTIVE_DATE.to_string(),
                    SortField::Subject => "LOWER(subject)".to_string(),
                    SortField::Sender => format!("LOWER({DISPLAY_SENDER})"),
                };
                let dir = match direction {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                };
                builder.push(format!("{column} {dir}, id ASC"));
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }
}

fn record_from_row(row: &SqliteRow) -> HistoryRecord {
    HistoryRecord {
        id: EntryId::new(row.get("id")),
        blob_hash: row.get("blob_hash"),
        display_name: row.get("display_name"),
        original_source: row.get("original_source"),
        last_accessed: row.get("last_accessed"),
        email: EmailMetadata {
            subject: row.get("subject"),
            sender_email: row.get("sender_email"),
            sender_name: row.get("sender_name"),
            recipient_emails: row.get("recipient_emails"),
            recipient_names: row.get("recipient_names"),
            email_date: row.get("email_date"),
            has_attachments: row.get::<bool, _>("has_attachments"),
            body_preview: row.get("body_preview"),
        },
    }
}
