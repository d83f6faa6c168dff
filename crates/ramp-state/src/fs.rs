//! Checksummed filesystem backend for [`ArtifactStore`].
//!
//! Writes go through a temp file in the target directory and an atomic
//! rename, so readers see either the old artifact or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Filesystem-backed artifact store.
///
/// Layout: `<root>/<submission>/<category>/<fold identity hex>`, where category
/// is `model`, `full_train`, `test`, `train_time`, `valid_time` or `test_time`.
///
/// Every file starts with the hex SHA-256 of its payload followed by a
/// newline. A file whose payload does not match (interrupted write, manual
/// edit) reads back as [`StorageError::Corrupt`].
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArtifactKey, category: &str) -> StorageResult<PathBuf> {
        let safe = !key.submission.is_empty()
            && key
                .submission
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("submission id not path-safe: {:?}", key.submission),
            )));
        }
        Ok(self
            .root
            .join(&key.submission)
            .join(category)
            .join(key.fold.to_hex()))
    }

    async fn write(&self, path: PathBuf, payload: Vec<u8>) -> StorageResult<()> {
        tokio::task::spawn_blocking(move || write_envelope(&path, &payload))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn read(&self, path: PathBuf, label: String) -> StorageResult<Vec<u8>> {
        tokio::task::spawn_blocking(move || read_envelope(&path, &label))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn write_envelope(path: &Path, payload: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "artifact path has no parent",
        ))
    })?;
    fs::create_dir_all(dir)?;

    // Atomic write: temp file in the same directory, then rename.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(hex::encode(Sha256::digest(payload)).as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.write_all(payload)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn read_envelope(path: &Path, label: &str) -> StorageResult<Vec<u8>> {
    let raw = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                key: label.to_string(),
            }
        } else {
            StorageError::Io(e)
        }
    })?;

    let corrupt = |reason: &str| StorageError::Corrupt {
        key: label.to_string(),
        reason: reason.to_string(),
    };
    if raw.len() < 65 || raw[64] != b'\n' {
        return Err(corrupt("missing checksum header"));
    }
    let (header, rest) = raw.split_at(64);
    let payload = &rest[1..];
    if hex::encode(Sha256::digest(payload)).as_bytes() != header {
        tracing::debug!(path = %path.display(), "artifact checksum mismatch");
        return Err(corrupt("checksum mismatch"));
    }
    Ok(payload.to_vec())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store_model(&self, key: &ArtifactKey, artifact: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key, "model")?;
        self.write(path, artifact.to_vec()).await
    }

    async fn load_model(&self, key: &ArtifactKey) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key, "model")?;
        self.read(path, format!("{key}/model")).await
    }

    async fn delete_model(&self, key: &ArtifactKey) -> StorageResult<()> {
        let path = self.path_for(key, "model")?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn store_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
        payload: &[u8],
    ) -> StorageResult<()> {
        let path = self.path_for(key, kind.as_str())?;
        self.write(path, payload.to_vec()).await
    }

    async fn load_predictions(
        &self,
        key: &ArtifactKey,
        kind: PredictionKind,
    ) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key, kind.as_str())?;
        self.read(path, format!("{key}/{}", kind.as_str())).await
    }

    async fn store_time(
        &self,
        key: &ArtifactKey,
        kind: TimingKind,
        seconds: f64,
    ) -> StorageResult<()> {
        let path = self.path_for(key, kind.as_str())?;
        self.write(path, seconds.to_string().into_bytes()).await
    }

    async fn load_time(&self, key: &ArtifactKey, kind: TimingKind) -> StorageResult<f64> {
        let path = self.path_for(key, kind.as_str())?;
        let label = format!("{key}/{}", kind.as_str());
        let bytes = self.read(path, label.clone()).await?;
        let text = String::from_utf8(bytes).map_err(|e| StorageError::Corrupt {
            key: label.clone(),
            reason: e.to_string(),
        })?;
        text.trim().parse::<f64>().map_err(|e| StorageError::Corrupt {
            key: label,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn key() -> ArtifactKey {
        ArtifactKey::new("m_team_a", FoldIdentity::from_indices(&[3, 1, 4, 1, 5]))
    }

    #[tokio::test]
    async fn model_roundtrip() {
        let (_dir, store) = make_store();
        store.store_model(&key(), b"weights").await.unwrap();
        assert_eq!(store.load_model(&key()).await.unwrap(), b"weights");
    }

    #[tokio::test]
    async fn layout_is_submission_category_fold() {
        let (dir, store) = make_store();
        store
            .store_predictions(&key(), PredictionKind::Test, b"[]")
            .await
            .unwrap();
        let expected = dir
            .path()
            .join("m_team_a")
            .join("test")
            .join(key().fold.to_hex());
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn truncated_file_reads_as_corrupt() {
        let (dir, store) = make_store();
        store.store_model(&key(), b"a long serialized model").await.unwrap();
        let path = dir
            .path()
            .join("m_team_a")
            .join("model")
            .join(key().fold.to_hex());
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 4]).unwrap();

        match store.load_model(&key()).await {
            Err(StorageError::Corrupt { reason, .. }) => assert!(reason.contains("checksum")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn headerless_file_reads_as_corrupt() {
        let (dir, store) = make_store();
        let path = dir
            .path()
            .join("m_team_a")
            .join("model")
            .join(key().fold.to_hex());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(store.load_model(&key()).await.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn time_roundtrip() {
        let (_dir, store) = make_store();
        store
            .store_time(&key(), TimingKind::Valid, 0.125)
            .await
            .unwrap();
        let t = store.load_time(&key(), TimingKind::Valid).await.unwrap();
        assert_eq!(t, 0.125);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let (_dir, store) = make_store();
        assert!(matches!(
            store.load_model(&key()).await,
            Err(StorageError::NotFound { .. })
        ));
        store.delete_model(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (_dir, store) = make_store();
        let bad = ArtifactKey::new("../escape", FoldIdentity::from_indices(&[0]));
        assert!(store.store_model(&bad, b"x").await.is_err());
    }
}
