//! Blob data models.

use serde::{Deserialize, Serialize};

/// Ledger entry for one stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Content hash (lowercase hex SHA-256) identifying the payload.
    pub hash: String,
    /// Size of the payload in bytes.
    pub size_bytes: u64,
    /// Number of history entries currently referencing the payload.
    /// Never zero: a blob with no references is deleted, not kept.
    pub ref_count: u32,
}
