//! History data models.

use serde::{Deserialize, Serialize};

/// Maximum stored length of a body preview, in characters.
pub(crate) const BODY_PREVIEW_MAX_CHARS: usize = 500;

/// Unique identifier for a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl EntryId {
    /// Create a new entry ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parsed email metadata attached to a history entry.
///
/// Produced by the (external) email parser. When ingest receives no
/// metadata, every field stays at its default: empty, zero, false.
/// An `email_date` of 0 means "unparseable," never a real epoch date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMetadata {
    /// Message subject.
    pub subject: String,
    /// Sender email address.
    pub sender_email: String,
    /// Sender display name.
    pub sender_name: String,
    /// Recipient email addresses, comma-joined.
    pub recipient_emails: String,
    /// Recipient display names, comma-joined.
    pub recipient_names: String,
    /// Message date as milliseconds since the Unix epoch; 0 if unknown.
    pub email_date: i64,
    /// Whether the message carries attachments.
    pub has_attachments: bool,
    /// Plain-text body preview, at most 500 characters.
    pub body_preview: String,
}

/// A single history entry referencing a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique, stable identifier.
    pub id: EntryId,
    /// Content hash of the referenced payload.
    pub blob_hash: String,
    /// User-facing name for the entry.
    pub display_name: String,
    /// Where the payload came from (a URI or path), if known.
    pub original_source: Option<String>,
    /// Last access time, milliseconds since the Unix epoch.
    pub last_accessed: i64,
    /// Parsed email metadata.
    pub email: EmailMetadata,
}

impl HistoryRecord {
    /// The date this entry sorts and filters by: the email's own date
    /// when parseable, otherwise the last access time.
    #[must_use]
    pub const fn effective_date(&self) -> i64 {
        if self.email.email_date > 0 {
            self.email.email_date
        } else {
            self.last_accessed
        }
    }

    /// Sender string for display: the name when present, else the
    /// address.
    #[must_use]
    pub fn display_sender(&self) -> &str {
        if self.email.sender_name.is_empty() {
            &self.email.sender_email
        } else {
            &self.email.sender_name
        }
    }

    /// Subject for display. Storage keeps the empty string; only the
    /// display layer substitutes "Untitled".
    #[must_use]
    pub fn display_subject(&self) -> &str {
        if self.email.subject.is_empty() {
            "Untitled"
        } else {
            &self.email.subject
        }
    }
}

/// Field a listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    /// Effective date (email date, falling back to last access).
    Date,
    /// Subject, case-insensitive.
    Subject,
    /// Display sender, case-insensitive.
    Sender,
}

/// Ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest/earliest first.
    Ascending,
    /// Largest/latest first.
    Descending,
}

/// Predicates narrowing a listing. Set fields compose with logical AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Keep only entries whose attachment flag matches.
    pub has_attachments: Option<bool>,
    /// Keep only entries whose effective date lies in `[from, to]`,
    /// inclusive on both ends.
    pub date_range: Option<(i64, i64)>,
    /// Keep only entries whose sender email or sender name contains
    /// this substring, case-insensitively.
    pub sender_contains: Option<String>,
}

impl HistoryFilter {
    /// Whether no predicate is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.has_attachments.is_none()
            && self.date_range.is_none()
            && self.sender_contains.is_none()
    }
}

/// A composed listing request: free-text search, filters, and ordering.
///
/// With no sort set, results order by effective date descending with
/// newest-inserted first on ties — the default "most recent" view.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Case-insensitive substring matched across subject, sender,
    /// recipients, and body preview. Blank matches everything.
    pub search: Option<String>,
    /// Metadata predicates, AND-composed with the search.
    pub filter: HistoryFilter,
    /// Explicit ordering; `None` uses the default most-recent view.
    pub sort: Option<(SortField, SortDirection)>,
}

/// Aggregate size of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of history entries.
    pub entry_count: u64,
    /// Total bytes across *distinct* stored payloads. A deduplicated
    /// payload shared by several entries counts once.
    pub total_size_bytes: u64,
}
