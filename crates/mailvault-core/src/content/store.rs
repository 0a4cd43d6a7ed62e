//! On-disk payload store keyed by content hash.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Result;

/// Directory under the store root holding one file per distinct payload.
const CAS_DIR: &str = "cas";

/// Durable key/value byte store addressed by content hash.
///
/// Payloads live at `cas/<hash>`. Writes go through a temporary sibling
/// and are renamed into place only after the bytes are fully on disk, so
/// a reader can never open a partially written payload.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) the payload store under `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `cas/` directory cannot be created.
    pub async fn open(base_dir: &Path) -> Result<Self> {
        let root = base_dir.join(CAS_DIR);
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Path of the payload file for a hash.
    #[must_use]
    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn tmp_path_for(&self, hash: &str) -> PathBuf {
        self.root.join(format!(".{hash}.partial"))
    }

    /// Write a payload under its hash. No-op if the file already exists.
    ///
    /// The bytes are written to a temporary sibling, synced, and renamed
    /// into place. The file must be durably complete before any ledger
    /// entry referencing the hash becomes visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the write, sync, or rename fails. On failure
    /// the final path is left untouched.
    pub async fn write(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let final_path = self.path_for(hash);
        if fs::try_exists(&final_path).await? {
            return Ok(());
        }

        let tmp_path = self.tmp_path_for(hash);
        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        drop(file);

        fs::rename(&tmp_path, &final_path).await?;
        debug!(hash, size = bytes.len(), "stored payload");
        Ok(())
    }

    /// Whether a payload file exists for the hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check itself fails.
    pub async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(hash)).await?)
    }

    /// Open a payload file for reading. `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error for any I/O failure other than the file not
    /// existing.
    pub async fn open_payload(&self, hash: &str) -> Result<Option<File>> {
        match File::open(self.path_for(hash)).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a payload into memory. `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error for any I/O failure other than the file not
    /// existing.
    pub async fn read(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(hash)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the payload file for a hash.
    ///
    /// Removing an already-absent file succeeds: the desired end state
    /// (absence) already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails for any other reason.
    pub async fn remove(&self, hash: &str) -> Result<()> {
        match fs::remove_file(self.path_for(hash)).await {
            Ok(()) => {
                debug!(hash, "removed payload");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every payload file, leaving an empty `cas/` directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be cleared or recreated.
    pub async fn remove_all(&self) -> Result<()> {
        fs::remove_dir_all(&self.root).await?;
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hash::content_hash;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let bytes = b"From: a@example.com\r\n\r\nhello";
        let hash = content_hash(bytes);
        store.write(&hash, bytes).await.unwrap();

        assert!(store.exists(&hash).await.unwrap());
        assert_eq!(store.read(&hash).await.unwrap().unwrap(), bytes);
    }

    #[tokio::test]
    async fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let hash = content_hash(b"payload");
        store.write(&hash, b"payload").await.unwrap();
        store.write(&hash, b"payload").await.unwrap();

        assert_eq!(store.read(&hash).await.unwrap().unwrap(), b"payload");
    }

    #[tokio::test]
    async fn no_partial_file_remains_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        let hash = content_hash(b"payload");
        store.write(&hash, b"payload").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("cas")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![hash]);
    }

    #[tokio::test]
    async fn remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        store.remove(&content_hash(b"never stored")).await.unwrap();
    }

    #[tokio::test]
    async fn open_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        assert!(store.open_payload("0".repeat(64).as_str()).await.unwrap().is_none());
        assert!(store.read("0".repeat(64).as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_all_clears_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();

        for payload in [&b"one"[..], b"two", b"three"] {
            store.write(&content_hash(payload), payload).await.unwrap();
        }
        store.remove_all().await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("cas")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
