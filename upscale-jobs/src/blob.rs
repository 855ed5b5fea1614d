//! Blob access for source media and upscaled output.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{JobError, Result};

/// Byte storage addressed by relative keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob. A missing key is [`JobError::SourceNotFound`].
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Write a blob, replacing any previous content atomically.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Move a finished local file into the store under `key`.
    async fn persist_file(&self, key: &str, file: &Path) -> Result<()>;

    /// Whether a blob exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Local filesystem path for `key`, for tools that need a real file.
    fn local_path(&self, key: &str) -> Result<PathBuf>;
}

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(JobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn prepare_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::Storage(format!("create {}: {}", parent.display(), e)))?;
        }
        Ok(())
    }

    fn temp_sibling(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        path.with_file_name(name)
    }

    /// Rename the staged `temp` over `path`. The temp file is removed when
    /// staging failed or the rename does.
    async fn commit(temp: &Path, path: &Path, staged: Result<()>, key: &str) -> Result<()> {
        let result = match staged {
            Ok(()) => tokio::fs::rename(temp, path)
                .await
                .map_err(|e| JobError::Storage(format!("commit {}: {}", key, e))),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(temp).await;
        }
        result
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => JobError::SourceNotFound(key.to_string()),
            _ => JobError::Storage(format!("read {}: {}", key, e)),
        })
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        Self::prepare_parent(&path).await?;

        let temp = Self::temp_sibling(&path);
        let staged = tokio::fs::write(&temp, data)
            .await
            .map_err(|e| JobError::Storage(format!("write {}: {}", key, e)));
        Self::commit(&temp, &path, staged, key).await?;
        tracing::debug!(key, bytes = data.len(), "Blob written");
        Ok(())
    }

    async fn persist_file(&self, key: &str, file: &Path) -> Result<()> {
        let path = self.resolve(key)?;
        Self::prepare_parent(&path).await?;

        // Copy next to the target first so the final rename stays on one filesystem
        let temp = Self::temp_sibling(&path);
        let staged = tokio::fs::copy(file, &temp)
            .await
            .map(|_| ())
            .map_err(|e| JobError::Storage(format!("copy {} to {}: {}", file.display(), key, e)));
        Self::commit(&temp, &path, staged, key).await?;
        tracing::debug!(key, source = %file.display(), "Blob persisted");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn local_path(&self, key: &str) -> Result<PathBuf> {
        self.resolve(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.write("images/out/a.png", b"png bytes").await.unwrap();
        assert_eq!(store.read("images/out/a.png").await.unwrap(), b"png bytes");
        assert!(store.exists("images/out/a.png").await.unwrap());

        store.write("images/out/a.png", b"replaced").await.unwrap();
        assert_eq!(store.read("images/out/a.png").await.unwrap(), b"replaced");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("images/out"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_staging_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mp4");
        let temp = FsBlobStore::temp_sibling(&target);
        // A write that died halfway
        std::fs::write(&temp, b"partial").unwrap();

        let staged = Err(JobError::Storage("write out.mp4: disk full".into()));
        let err = FsBlobStore::commit(&temp, &target, staged, "out.mp4")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!temp.exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_missing_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.read("nope.mp4").await.unwrap_err();
        assert!(matches!(err, JobError::SourceNotFound(_)));
        assert!(!store.exists("nope.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        for key in ["../etc/passwd", "/abs/path", "a/../../b", ""] {
            assert!(matches!(
                store.write(key, b"x").await,
                Err(JobError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_persist_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs"));
        let local = dir.path().join("local.mp4");
        std::fs::write(&local, b"video").unwrap();

        store.persist_file("upscaled/v/j.mp4", &local).await.unwrap();
        assert_eq!(store.read("upscaled/v/j.mp4").await.unwrap(), b"video");
        assert_eq!(
            store.local_path("upscaled/v/j.mp4").unwrap(),
            dir.path().join("blobs/upscaled/v/j.mp4")
        );
    }
}
