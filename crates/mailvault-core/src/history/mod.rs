//! History entry index.
//!
//! This module stores one metadata record per logical history entry and
//! provides the search, sort, and filter query surface over those
//! records. Entries reference payloads in the content store by hash;
//! they never hold the payload bytes themselves.

mod model;
mod repository;

pub use model::{
    CacheStats, EmailMetadata, EntryId, HistoryFilter, HistoryQuery, HistoryRecord, SortDirection,
    SortField,
};
pub use repository::HistoryIndex;
