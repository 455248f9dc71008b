use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use super::{BlobStore, StorageError};

/// Local filesystem blob store for development and tests.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(storage_path: &str) -> Self {
        let base_path = PathBuf::from(storage_path);
        // Best-effort at construction time; upload creates parents anyway.
        std::fs::create_dir_all(&base_path).ok();
        Self { base_path }
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn upload_bytes(
        &self,
        data: &[u8],
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve_path(key);
        if !path.exists() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(fs::read(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_upload_download() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        let data = b"%PDF-1.7 fake pdf body";
        storage
            .upload_bytes(data, "uploads/test.pdf", Some("application/pdf"))
            .await
            .unwrap();

        let downloaded = storage.download("uploads/test.pdf").await.unwrap();
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_local_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        storage.upload_bytes(b"data", "del.pdf", None).await.unwrap();
        assert!(storage.delete("del.pdf").await.unwrap());
        assert!(!storage.delete("del.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        let result = storage.download("missing.pdf").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
