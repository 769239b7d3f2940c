/// Document file storage
///
/// Handlers only see the [`FileStore`] trait; [`LocalFileStore`] keeps files in
/// a flat directory under their randomized stored names.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid stored file name: {0}")]
    InvalidName(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Writes a new file; never overwrites
    async fn put(&self, name: &str, body: Bytes) -> Result<(), StorageError>;

    async fn get(&self, name: &str) -> Result<Bytes, StorageError>;

    /// Removes a file; a missing file is reported as `NotFound`
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// Stores files in a local directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Creates the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c| c == '/' || c == '\\')
            && !name.contains("..");
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

fn map_not_found(err: std::io::Error, name: &str) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
        std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(name.to_string()),
        _ => StorageError::Io(err),
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, name: &str, body: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(name)?;

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| map_not_found(e, name))?;
        write_new(&path, file, &body).await?;

        tracing::debug!(file = %name, bytes = body.len(), "Stored file");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(name)?;
        let data = tokio::fs::read(&path).await.map_err(|e| map_not_found(e, name))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(e, name))
    }
}

/// Writes `body` into the freshly created file at `path`, removing the file
/// again if the write fails
async fn write_new<W>(path: &Path, mut writer: W, body: &[u8]) -> Result<(), StorageError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(body).await?;
        writer.flush().await
    }
    .await;
    drop(writer);

    if let Err(e) = written {
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %remove_err,
                "Failed to remove partially written file"
            );
        }
        return Err(StorageError::Io(e));
    }
    Ok(())
}

/// Deletes every named file, logging and swallowing failures
pub async fn remove_files(store: &dyn FileStore, names: &[String]) {
    for name in names {
        if let Err(e) = store.delete(name).await {
            tracing::warn!(file = %name, error = %e, "Failed to remove stored file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts a few bytes, then fails like a full disk
    struct FullDisk {
        accepted: usize,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.accepted >= 4 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            let n = buf.len().min(4 - self.accepted);
            self.accepted += n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn store() -> (tempfile::TempDir, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().join("uploads")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = store().await;

        store
            .put("1700000000000-abc.pdf", Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap();
        assert!(store.root().join("1700000000000-abc.pdf").exists());

        let data = store.get("1700000000000-abc.pdf").await.unwrap();
        assert_eq!(&data[..], b"%PDF-1.7");

        store.delete("1700000000000-abc.pdf").await.unwrap();
        assert!(matches!(
            store.get("1700000000000-abc.pdf").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_never_overwrites() {
        let (_dir, store) = store().await;

        store.put("a.csv", Bytes::from_static(b"first")).await.unwrap();
        let second = store.put("a.csv", Bytes::from_static(b"second")).await;

        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));
        assert_eq!(&store.get("a.csv").await.unwrap()[..], b"first");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, store) = store().await;

        for name in ["", "../secret", "nested/file.pdf", "..\\x.pdf", ".hidden"] {
            assert!(
                matches!(store.put(name, Bytes::new()).await, Err(StorageError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_remove_files_ignores_missing() {
        let (_dir, store) = store().await;
        store.put("keep.png", Bytes::from_static(b"png")).await.unwrap();

        remove_files(&store, &["keep.png".to_string(), "gone.png".to_string()]).await;

        assert!(!store.root().join("keep.png").exists());
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let (_dir, store) = store().await;
        let path = store.root().join("1700000000000-partial.pdf");
        tokio::fs::write(&path, b"%PDF").await.unwrap();

        let result = write_new(&path, FullDisk { accepted: 0 }, b"%PDF-1.7 and more").await;

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!path.exists());
    }
}
