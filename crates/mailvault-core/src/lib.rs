//! # mailvault-core
//!
//! Content-addressable storage for email payloads with a searchable
//! history index.
//!
//! This crate provides:
//! - **Deduplicated payload storage** - each distinct payload is stored
//!   once on disk, keyed by its SHA-256 content hash
//! - **Reference-counted blob lifecycle** - a payload file lives exactly
//!   as long as history entries reference it
//! - **History index** - one metadata record per entry, with search,
//!   sort, and filter over subjects, senders, recipients, and dates
//! - **Bounded retention** - optional eviction of least recently
//!   accessed entries past a configured limit
//! - **Snapshot publication** - subscribers receive an immutable,
//!   fully-ordered view of the record set after every mutation
//!
//! UI rendering, email parsing, and network I/O are out of scope;
//! callers hand this crate opaque bytes plus already-parsed metadata.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod blob;
pub mod clock;
pub mod content;
mod error;
pub mod hash;
pub mod history;
pub mod store;

pub use blob::{BlobLedger, BlobRecord};
pub use clock::{Clock, SystemClock};
pub use content::ContentStore;
pub use error::{Error, Result};
pub use hash::content_hash;
pub use history::{
    CacheStats, EmailMetadata, EntryId, HistoryFilter, HistoryIndex, HistoryQuery, HistoryRecord,
    SortDirection, SortField,
};
pub use store::{DedupPolicy, HistorySnapshot, HistoryStore, StoreConfig};
