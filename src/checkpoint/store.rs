//! File-backed checkpoint store

use crate::error::{AgentError, AgentResult};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

const CHECKPOINT_LEN: usize = 8;

/// Persists a single ledger height as an 8-byte big-endian integer
pub struct CheckpointStore {
    path: PathBuf,
    /// Guards file access; holds the last value known to be on disk
    persisted: Mutex<Option<u64>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persisted: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted height
    ///
    /// Fails with [`AgentError::CheckpointNotFound`] when nothing was saved yet.
    pub async fn load(&self) -> AgentResult<u64> {
        let mut persisted = self.persisted.lock().await;

        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AgentError::CheckpointNotFound)
            }
            Err(e) => return Err(e.into()),
        };

        let raw: [u8; CHECKPOINT_LEN] = bytes.as_slice().try_into().map_err(|_| {
            AgentError::DataIntegrity(format!(
                "checkpoint file {:?} holds {} bytes, expected {}",
                self.path,
                bytes.len(),
                CHECKPOINT_LEN
            ))
        })?;

        let height = u64::from_be_bytes(raw);
        *persisted = Some(height);
        Ok(height)
    }

    /// Read the persisted height, falling back to `initial` when none exists
    pub async fn load_or(&self, initial: u64) -> AgentResult<u64> {
        match self.load().await {
            Ok(height) => Ok(height),
            Err(AgentError::CheckpointNotFound) => Ok(initial),
            Err(e) => Err(e),
        }
    }

    /// Persist `height`
    ///
    /// The value is written to a sibling temp file, synced and renamed over
    /// the checkpoint, so a crash leaves either the old or the new value.
    pub async fn save(&self, height: u64) -> AgentResult<()> {
        let mut persisted = self.persisted.lock().await;
        if *persisted == Some(height) {
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&height.to_be_bytes()).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &self.path).await?;

        *persisted = Some(height);
        debug!("Saved checkpoint {} to {:?}", height, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.dat"));

        assert!(matches!(
            store.load().await,
            Err(AgentError::CheckpointNotFound)
        ));
        assert_eq!(store.load_or(42).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_save_creates_directory_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint.dat");
        let store = CheckpointStore::new(&path);

        store.save(1_234_567).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, 1_234_567u64.to_be_bytes().to_vec());
        assert!(!path.with_extension("tmp").exists());

        // A fresh store sees the persisted value
        let reopened = CheckpointStore::new(&path);
        assert_eq!(reopened.load_or(0).await.unwrap(), 1_234_567);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_value() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.dat"));

        assert_ok!(store.save(10).await);
        assert_ok!(store.save(11).await);
        assert_eq!(assert_ok!(store.load().await), 11);
    }

    #[tokio::test]
    async fn test_truncated_file_is_integrity_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.dat");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[tokio::test]
    async fn test_save_fails_when_directory_cannot_be_created() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = CheckpointStore::new(blocker.join("checkpoint.dat"));
        let err = assert_err!(store.save(5).await);
        assert!(matches!(err, AgentError::CheckpointIo(_)));
        assert!(err.is_retryable());
    }
}
