//! History store orchestration.
//!
//! This module composes the content store, blob ledger, and history
//! index into one store with a single mutation lock, bounded retention,
//! and snapshot publication for reactive list rendering.

mod config;
mod history;

pub use config::{DedupPolicy, StoreConfig};
pub use history::{HistorySnapshot, HistoryStore};
