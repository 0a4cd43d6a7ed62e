//! Content hashing.
//!
//! A payload's identity is the SHA-256 of its bytes, rendered as
//! lowercase hex. Identical payloads always hash to the same string,
//! which is what makes deduplication and the `cas/<hash>` file layout
//! work.

use sha2::{Digest, Sha256};

/// Compute the content hash of a byte payload.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn known_digest() {
        // sha256 of the empty input
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn distinct_inputs_distinct_hashes() {
        assert_ne!(content_hash(b"one"), content_hash(b"two"));
    }

    #[test]
    fn hex_is_lowercase_and_64_chars() {
        let hash = content_hash(b"payload");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    proptest! {
        #[test]
        fn hashing_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
            prop_assert_eq!(content_hash(&bytes), content_hash(&bytes));
        }
    }
}
