//! Content-addressable payload storage.
//!
//! This module provides the on-disk half of deduplication: one file per
//! distinct payload, named by the payload's content hash.

mod store;

pub use store::ContentStore;
